use std::io::Write;
use std::path::Path;

/// Ordered `key,value` lines describing one queued item.
///
/// Lines beginning with `#` and blank lines are ignored when parsing. The
/// line is split at the first comma, so values may contain commas. Lines
/// without any comma are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFile {
    entries: Vec<(String, String)>,
}

impl IndexFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Line breaks in `value` are replaced by spaces.
    pub fn push<K: Into<String>, V: AsRef<str>>(&mut self, key: K, value: V) {
        let value = value.as_ref().replace(['\r', '\n'], " ");
        self.entries.push((key.into(), value));
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The value of the first entry named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .map(|line| line.trim_end_matches(['\r', '\n']))
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(','))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { entries }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn write_to<W: Write>(&self, mut wtr: W) -> std::io::Result<()> {
        for (key, value) in self.entries.iter() {
            writeln!(wtr, "{key},{value}")?;
        }
        wtr.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_skips_comments_and_lines_without_comma() {
        let idx = IndexFile::parse(
            "# written by hand\r\n\
             file,queue/x-camera_para.dat\r\n\
             \n\
             garbage line\n\
             device_id,acme/phone,rev2\n",
        );
        assert_eq!(
            idx.entries(),
            &[
                ("file".to_string(), "queue/x-camera_para.dat".to_string()),
                ("device_id".to_string(), "acme/phone,rev2".to_string()),
            ]
        );
        assert_eq!(idx.get("device_id"), Some("acme/phone,rev2"));
        assert_eq!(idx.get("missing"), None);
    }

    #[test]
    fn written_lines_parse_back() {
        let mut idx = IndexFile::new();
        idx.push("camera_face", "rear");
        idx.push("os_version", "14\nbeta");
        let mut buf = Vec::new();
        idx.write_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf.clone()).unwrap(),
            "camera_face,rear\nos_version,14 beta\n"
        );
        assert_eq!(IndexFile::parse(std::str::from_utf8(&buf).unwrap()), idx);
    }
}
