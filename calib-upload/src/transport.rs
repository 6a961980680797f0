use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use tracing::debug;

use calib_upload_queue::{IndexFile, index_keys};

use crate::UploaderConfig;

/// Version of the upload form understood by the collection server.
pub const PROTOCOL_VERSION: &str = "1";

/// Form field carrying the protocol version.
pub const VERSION_FIELD: &str = "version";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("HTTP client setup failed: {0}")]
    Setup(#[source] BoxError),
    #[error("network not reachable: {0}")]
    NoConnectivity(#[source] BoxError),
    #[error("cannot read file to upload \"{path}\": {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer failed: {0}")]
    Transfer(#[source] BoxError),
}

/// The file part of an [UploadForm].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub path: PathBuf,
    /// Name announced to the server, the final component of `path`.
    pub file_name: String,
}

/// One part of an [UploadForm].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text { name: String, value: String },
    File(FilePart),
}

/// A multipart form built from an index file.
///
/// Parts keep the order of the index lines. The first `file` entry becomes a
/// file part and every other entry a text field. The protocol version is
/// appended last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadForm {
    pub parts: Vec<FormPart>,
}

impl UploadForm {
    /// Returns `None` if the index has no entries at all.
    pub fn from_index(index: &IndexFile) -> Option<Self> {
        if index.is_empty() {
            return None;
        }
        let mut form = Self::default();
        for (key, value) in index.entries() {
            if key == index_keys::FILE && form.file().is_none() {
                let path = PathBuf::from(value);
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| value.clone());
                form.parts.push(FormPart::File(FilePart {
                    field: key.clone(),
                    path,
                    file_name,
                }));
            } else {
                form.push_text(key, value);
            }
        }
        form.push_text(VERSION_FIELD, PROTOCOL_VERSION);
        Some(form)
    }

    fn push_text(&mut self, name: &str, value: &str) {
        self.parts.push(FormPart::Text {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn file(&self) -> Option<&FilePart> {
        self.parts.iter().find_map(|part| match part {
            FormPart::File(file) => Some(file),
            FormPart::Text { .. } => None,
        })
    }

    pub fn payload_path(&self) -> Option<&Path> {
        self.file().map(|f| f.path.as_path())
    }

    /// Value of the first text field called `name`.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            FormPart::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Field names in the order they are sent.
    pub fn field_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|part| match part {
                FormPart::Text { name, .. } => name.as_str(),
                FormPart::File(file) => file.field.as_str(),
            })
            .collect()
    }
}

/// An open connection to the network for the duration of one upload cycle.
pub trait Transport {
    /// Cheap check that the network is reachable at all.
    fn check_connectivity(&mut self) -> Result<(), TransportError>;
    /// POST `form` to `url` and return the HTTP status code.
    fn post_form(&mut self, url: &str, form: &UploadForm) -> Result<u16, TransportError>;
}

/// Opens a [Transport] at the start of each upload cycle.
pub trait Connector: Send {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Uploads over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpConnector {
    probe_url: String,
    timeout: Duration,
    verify_tls: bool,
}

impl HttpConnector {
    pub fn new<S: Into<String>>(probe_url: S, timeout: Duration, verify_tls: bool) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
            verify_tls,
        }
    }

    pub fn from_config(cfg: &UploaderConfig) -> Self {
        Self::new(&cfg.connectivity_probe_url, cfg.timeout(), cfg.verify_tls)
    }
}

impl Connector for HttpConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| TransportError::Setup(Box::new(e)))?;
        Ok(Box::new(HttpTransport {
            client,
            probe_url: self.probe_url.clone(),
        }))
    }
}

struct HttpTransport {
    client: reqwest::blocking::Client,
    probe_url: String,
}

impl Transport for HttpTransport {
    fn check_connectivity(&mut self) -> Result<(), TransportError> {
        let response = self
            .client
            .head(&self.probe_url)
            .send()
            .map_err(|e| TransportError::NoConnectivity(Box::new(e)))?;
        let status = response.status();
        debug!("connectivity probe \"{}\": {status}", self.probe_url);
        if !status.is_success() {
            return Err(TransportError::NoConnectivity(
                format!("probe returned {status}").into(),
            ));
        }
        Ok(())
    }

    fn post_form(&mut self, url: &str, form: &UploadForm) -> Result<u16, TransportError> {
        let mut multipart = Form::new();
        for part in form.parts.iter() {
            multipart = match part {
                FormPart::Text { name, value } => multipart.text(name.clone(), value.clone()),
                FormPart::File(file) => {
                    let part = Part::file(&file.path)
                        .map_err(|source| TransportError::LocalFile {
                            path: file.path.clone(),
                            source,
                        })?
                        .file_name(file.file_name.clone())
                        .mime_str("application/octet-stream")
                        .map_err(|e| TransportError::Transfer(Box::new(e)))?;
                    multipart.part(file.field.clone(), part)
                }
            };
        }

        let response = self
            .client
            .post(url)
            .multipart(multipart)
            .send()
            .map_err(|e| TransportError::Transfer(Box::new(e)))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn form_from_index() {
        let idx = IndexFile::parse(
            "file,/var/spool/queue/20240222164128-abc-camera_para.dat\n\
             camera_face,rear\n\
             ss,token\n",
        );
        let form = UploadForm::from_index(&idx).unwrap();
        let file = form.file().unwrap();
        assert_eq!(file.field, "file");
        assert_eq!(file.file_name, "20240222164128-abc-camera_para.dat");
        assert_eq!(
            form.payload_path(),
            Some(Path::new("/var/spool/queue/20240222164128-abc-camera_para.dat"))
        );
        assert_eq!(form.text_field("camera_face"), Some("rear"));
        assert_eq!(form.text_field("ss"), Some("token"));
        assert_eq!(form.text_field("file"), None);
        assert_eq!(
            form.parts.last(),
            Some(&FormPart::Text {
                name: "version".to_string(),
                value: "1".to_string(),
            })
        );
    }

    #[test]
    fn form_keeps_index_order() {
        let idx = IndexFile::parse(
            "timestamp,2024-02-22 16:41:28\n\
             file,queue/x-camera_para.dat\n\
             camera_face,front\n\
             file,queue/other.dat\n",
        );
        let form = UploadForm::from_index(&idx).unwrap();
        assert_eq!(
            form.field_names(),
            ["timestamp", "file", "camera_face", "file", "version"]
        );
        // Only the first `file` entry is a file part.
        assert!(matches!(form.parts[1], FormPart::File(_)));
        assert!(matches!(
            &form.parts[3],
            FormPart::Text { value, .. } if value == "queue/other.dat"
        ));
        assert_eq!(form.payload_path(), Some(Path::new("queue/x-camera_para.dat")));
    }

    #[test]
    fn form_without_file() {
        let idx = IndexFile::parse("camera_face,rear\n");
        let form = UploadForm::from_index(&idx).unwrap();
        assert_eq!(form.payload_path(), None);
        assert_eq!(form.field_names(), ["camera_face", "version"]);
    }

    #[test]
    fn empty_index_gives_no_form() {
        assert_eq!(UploadForm::from_index(&IndexFile::parse("# only\n")), None);
    }
}
