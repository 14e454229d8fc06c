use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{RawScan, RawSession, SessionRef};
use crate::error::KiraError;
use crate::fs_util;
use crate::session::parse_upload_time;

pub trait ArchiveClient: Send + Sync {
    fn project_exists(&self, project: &str) -> Result<bool, KiraError>;
    fn list_subjects(&self, project: &str) -> Result<Vec<String>, KiraError>;
    fn subject_exists(&self, project: &str, subject: &str) -> Result<bool, KiraError>;
    fn list_sessions(&self, project: &str, subject: &str) -> Result<Vec<RawSession>, KiraError>;
    fn list_scans(&self, session: &SessionRef) -> Result<Vec<RawScan>, KiraError>;
    // TransientFetch is retried by the caller; ArchiveNotFound is final.
    fn fetch(
        &self,
        session: &SessionRef,
        scan: &RawScan,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, KiraError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Login {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Login {
    pub fn load(path: &Path) -> Result<Self, KiraError> {
        let content =
            fs::read_to_string(path).map_err(|_| KiraError::LoginRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }
}

#[derive(Clone)]
pub struct XnatHttpClient {
    client: Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl XnatHttpClient {
    pub fn new(login: Login) -> Result<Self, KiraError> {
        let server = login.server.ok_or(KiraError::MissingServer)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-bids/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| KiraError::ArchiveHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: server.trim_end_matches('/').to_string(),
            user: login.user,
            password: login.password,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    fn send(&self, path: &str, what: &str) -> Result<Response, KiraError> {
        let response = self.get(path).send().map_err(|err| {
            if is_retryable_error(&err) {
                KiraError::TransientFetch(err.to_string())
            } else {
                KiraError::ArchiveHttp(err.to_string())
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(KiraError::ArchiveNotFound(what.to_string()));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "archive request failed".to_string());
        if is_retryable_status(status.as_u16()) {
            return Err(KiraError::TransientFetch(format!(
                "{what}: status {}",
                status.as_u16()
            )));
        }
        Err(KiraError::ArchiveStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn result_set(&self, path: &str, what: &str) -> Result<Vec<Value>, KiraError> {
        let response = self.send(path, what)?;
        let body: Value = response
            .json()
            .map_err(|err| KiraError::ArchiveHttp(err.to_string()))?;
        Ok(parse_result_set(&body))
    }
}

impl ArchiveClient for XnatHttpClient {
    fn project_exists(&self, project: &str) -> Result<bool, KiraError> {
        match self.send(&format!("/data/projects/{project}?format=json"), project) {
            Ok(_) => Ok(true),
            Err(KiraError::ArchiveNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn list_subjects(&self, project: &str) -> Result<Vec<String>, KiraError> {
        let rows = self.result_set(
            &format!("/data/projects/{project}/subjects?format=json&columns=ID,label"),
            project,
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| field(row, "label"))
            .collect())
    }

    fn subject_exists(&self, project: &str, subject: &str) -> Result<bool, KiraError> {
        match self.send(
            &format!("/data/projects/{project}/subjects/{subject}?format=json"),
            subject,
        ) {
            Ok(_) => Ok(true),
            Err(KiraError::ArchiveNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn list_sessions(&self, project: &str, subject: &str) -> Result<Vec<RawSession>, KiraError> {
        let rows = self.result_set(
            &format!(
                "/data/projects/{project}/subjects/{subject}/experiments?format=json&columns=ID,label,date,time,insert_date"
            ),
            subject,
        )?;
        Ok(rows.iter().filter_map(session_from_row).collect())
    }

    fn list_scans(&self, session: &SessionRef) -> Result<Vec<RawScan>, KiraError> {
        let rows = self.result_set(
            &format!(
                "/data/experiments/{}/scans?format=json",
                session.archive_id()
            ),
            session.raw_identifier(),
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = field(row, "ID")?;
                let label = field(row, "type").or_else(|| field(row, "series_description"))?;
                Some(RawScan::new(id, label))
            })
            .collect())
    }

    fn fetch(
        &self,
        session: &SessionRef,
        scan: &RawScan,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, KiraError> {
        let what = format!("{} scan {}", session.raw_identifier(), scan.numeric_id);
        let mut response = self.send(
            &format!(
                "/data/experiments/{}/scans/{}/resources/DICOM/files?format=zip",
                session.archive_id(),
                scan.numeric_id
            ),
            &what,
        )?;

        fs::create_dir_all(dest_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp_dir = tempfile::Builder::new()
            .prefix("kira-bids-fetch")
            .tempdir()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let zip_path = temp_dir.path().join("scan.zip");
        let mut file = fs::File::create(&zip_path)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| KiraError::TransientFetch(format!("{what}: {err}")))?;
        drop(file);

        // A truncated body shows up as an unreadable archive.
        fs_util::validate_zip(&zip_path)
            .map_err(|err| KiraError::TransientFetch(format!("{what}: {err}")))?;
        let extract_dir = temp_dir.path().join("extract");
        fs_util::extract_zip(&zip_path, &extract_dir)?;
        fs_util::flatten_into(&extract_dir, dest_dir)
    }
}

fn parse_result_set(body: &Value) -> Vec<Value> {
    body.get("ResultSet")
        .and_then(|set| set.get("Result"))
        .and_then(|rows| rows.as_array())
        .cloned()
        .unwrap_or_default()
}

fn field(row: &Value, name: &str) -> Option<String> {
    match row.get(name)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn session_from_row(row: &Value) -> Option<RawSession> {
    let label = field(row, "label")?;
    let archive_id = field(row, "ID").unwrap_or_else(|| label.clone());
    let upload_timestamp = field(row, "date")
        .and_then(|date| parse_upload_time(&date, field(row, "time").as_deref()))
        .or_else(|| field(row, "insert_date").and_then(|date| parse_upload_time(&date, None)));
    Some(RawSession {
        archive_id,
        raw_identifier: label,
        upload_timestamp,
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_session_rows() {
        let body = json!({
            "ResultSet": {
                "Result": [
                    {"ID": "XNAT_E001", "label": "20180504", "date": "2018-05-04", "time": "09:30:00"},
                    {"ID": "XNAT_E002", "label": "20180609_2", "insert_date": "2018-06-09 14:00:00.0"},
                    {"ID": "XNAT_E003"}
                ]
            }
        });
        let sessions: Vec<RawSession> = parse_result_set(&body)
            .iter()
            .filter_map(session_from_row)
            .collect();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].archive_id, "XNAT_E001");
        assert_eq!(
            sessions[0].upload_timestamp.unwrap().to_string(),
            "2018-05-04 09:30:00"
        );
        assert_eq!(
            sessions[1].upload_timestamp.unwrap().to_string(),
            "2018-06-09 14:00:00"
        );
    }

    #[test]
    fn missing_result_set_is_empty() {
        assert!(parse_result_set(&json!({"items": []})).is_empty());
    }
}
