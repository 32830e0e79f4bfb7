//! Typed client for the registry REST backend.
//!
//! Every call goes through [`RegistryApi`] so the worker and its tests do not
//! depend on a live server. [`HttpRegistry`] is the blocking reqwest
//! implementation used by the binary.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::domain::RouteStyle;
use crate::session::Session;
use crate::table::edit::FieldMap;
use crate::table::row::{Circle, RowId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT_VALUE: &str = concat!("regtv/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },
    #[error("session expired, please log in again")]
    Unauthorized,
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Text shown to the user in the status line or a popup.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Generic server acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Ack {
    pub message: Option<String>,
    pub id: Option<RowId>,
    pub filename: Option<String>,
}

impl Ack {
    pub fn text(&self, fallback: &str) -> String {
        self.message.clone().unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    pub id: RowId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub place_of_birth: Option<String>,
    pub join_date_to_organization: Option<String>,
    pub join_date_to_circle: Option<String>,
    pub id_document_number: String,
    pub phone_number: String,
    pub email: String,
    pub contribution: Option<i64>,
    pub circle: String,
    pub region: String,
    pub membership_form_scan: Option<String>,
    pub additional_fields: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemberPage {
    pub members: Vec<Member>,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberQuery {
    pub page: usize,
    pub limit: usize,
    pub search: String,
    pub status: Option<String>,
}

impl MemberQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
            ("search", self.search.clone()),
            ("status", self.status.clone().unwrap_or_default()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Document {
    pub id: RowId,
    pub filename: String,
    pub document_type: String,
    pub upload_date: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DocumentList {
    documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportReport {
    pub message: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    token: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct Reason<'a> {
    reason: &'a str,
}

#[derive(Serialize)]
struct NewCircle<'a> {
    name: &'a str,
    region: &'a str,
}

pub trait RegistryApi: Send + Sync {
    fn login(&self, email: &str, password: &str) -> ApiResult<String>;
    fn register(&self, username: &str, email: &str, password: &str) -> ApiResult<String>;
    fn verify_session(&self) -> ApiResult<Ack>;

    fn list_members(&self, query: &MemberQuery) -> ApiResult<MemberPage>;
    fn create_member(&self, fields: &FieldMap) -> ApiResult<Ack>;
    fn update_member(&self, id: RowId, fields: &FieldMap, routes: RouteStyle) -> ApiResult<Ack>;
    fn delete_member(&self, id: RowId, reason: &str, routes: RouteStyle) -> ApiResult<Ack>;
    fn ban_member(&self, id: RowId, reason: &str) -> ApiResult<Ack>;
    fn unban_member(&self, id: RowId) -> ApiResult<Ack>;
    fn purge_member(&self, id: RowId) -> ApiResult<Ack>;
    fn update_declaration(&self, id: RowId, file: &Path) -> ApiResult<Ack>;

    fn list_circles(&self) -> ApiResult<Vec<Circle>>;
    fn create_circle(&self, name: &str, region: &str) -> ApiResult<Ack>;
    fn delete_circle(&self, id: RowId) -> ApiResult<Ack>;

    fn list_documents(&self, member: RowId) -> ApiResult<Vec<Document>>;
    fn upload_document(&self, member: RowId, document_type: &str, file: &Path) -> ApiResult<Ack>;
    fn download_document(&self, id: RowId) -> ApiResult<Download>;
    fn delete_document(&self, id: RowId) -> ApiResult<Ack>;

    fn export_members(&self) -> ApiResult<Vec<u8>>;
    fn import_members(&self, file: &Path) -> ApiResult<ImportReport>;
}

pub struct HttpRegistry {
    client: Client,
    base: String,
    session: Session,
}

impl HttpRegistry {
    pub fn new(base: &str, session: Session) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT_VALUE)
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base);
        trace!("{method} {url}");
        let builder = self.client.request(method, url);
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends the request and maps 401 and error statuses. A 401 also drops
    /// the stored token.
    fn execute(&self, builder: RequestBuilder) -> ApiResult<Response> {
        let response = builder.send()?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Server answered 401, clearing session");
            if let Err(e) = self.session.clear() {
                warn!("Could not clear session: {e}");
            }
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        Ok(response)
    }

    fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let response = self.execute(builder)?;
        let status = response.status();
        let body = response.text()?;
        decode(&body, status)
    }
}

/// Error text of a failed response: its `message` or `error` field, the raw
/// body, or the status reason.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() < 200 {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

/// Decodes a success body. A body carrying only an `error` field is a rejection.
fn decode<T: DeserializeOwned>(body: &str, status: StatusCode) -> ApiResult<T> {
    let body = if body.trim().is_empty() { "{}" } else { body };
    let value: Value = serde_json::from_str(body)?;
    if value.get("message").is_none()
        && let Some(error) = value.get("error").and_then(Value::as_str)
    {
        return Err(ApiError::Rejected {
            status: status.as_u16(),
            message: error.to_string(),
        });
    }
    Ok(serde_json::from_value(value)?)
}

fn attachment_filename(response: &Response, fallback: &str) -> String {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| fallback.to_string())
}

fn filename_from_disposition(header: &str) -> Option<String> {
    let (_, rest) = header.split_once("filename=")?;
    let name = rest.split(';').next()?.trim().trim_matches('"');
    let name = name.rsplit(['/', '\\']).next()?;
    Some(name.to_string()).filter(|n| !n.is_empty())
}

impl RegistryApi for HttpRegistry {
    fn login(&self, email: &str, password: &str) -> ApiResult<String> {
        let body = Credentials {
            username: None,
            email,
            password,
        };
        let auth: AuthToken = self.send(self.request(Method::POST, "/auth/login").json(&body))?;
        debug!("Logged in as {email}");
        Ok(auth.token)
    }

    fn register(&self, username: &str, email: &str, password: &str) -> ApiResult<String> {
        let body = Credentials {
            username: Some(username),
            email,
            password,
        };
        let auth: AuthToken =
            self.send(self.request(Method::POST, "/auth/register").json(&body))?;
        debug!("Registered {username} <{email}>");
        Ok(auth.token)
    }

    fn verify_session(&self) -> ApiResult<Ack> {
        self.send(self.request(Method::GET, "/protected_area"))
    }

    fn list_members(&self, query: &MemberQuery) -> ApiResult<MemberPage> {
        self.send(self.request(Method::GET, "/members").query(&query.params()))
    }

    fn create_member(&self, fields: &FieldMap) -> ApiResult<Ack> {
        self.send(self.request(Method::POST, "/members").json(fields))
    }

    fn update_member(&self, id: RowId, fields: &FieldMap, routes: RouteStyle) -> ApiResult<Ack> {
        let builder = match routes {
            RouteStyle::Legacy => self.request(Method::PATCH, &format!("/edit_user/{id}")),
            RouteStyle::Rest => self.request(Method::PUT, &format!("/members/{id}")),
        };
        self.send(builder.json(fields))
    }

    fn delete_member(&self, id: RowId, reason: &str, routes: RouteStyle) -> ApiResult<Ack> {
        let builder = match routes {
            RouteStyle::Legacy => self.request(Method::DELETE, &format!("/delete_user/{id}")),
            RouteStyle::Rest => self.request(Method::DELETE, &format!("/members/{id}")),
        };
        self.send(builder.json(&Reason { reason }))
    }

    fn ban_member(&self, id: RowId, reason: &str) -> ApiResult<Ack> {
        self.send(
            self.request(Method::POST, &format!("/ban_user/{id}"))
                .json(&Reason { reason }),
        )
    }

    fn unban_member(&self, id: RowId) -> ApiResult<Ack> {
        self.send(self.request(Method::POST, &format!("/unban_user/{id}")))
    }

    fn purge_member(&self, id: RowId) -> ApiResult<Ack> {
        self.send(self.request(
            Method::DELETE,
            &format!("/permanently_delete_from_archive/{id}"),
        ))
    }

    fn update_declaration(&self, id: RowId, file: &Path) -> ApiResult<Ack> {
        let form = Form::new().file("declaration_file", file)?;
        self.send(
            self.request(Method::POST, &format!("/update_declaration/{id}"))
                .multipart(form),
        )
    }

    fn list_circles(&self) -> ApiResult<Vec<Circle>> {
        self.send(self.request(Method::GET, "/get_circles"))
    }

    fn create_circle(&self, name: &str, region: &str) -> ApiResult<Ack> {
        self.send(
            self.request(Method::POST, "/create_circle")
                .json(&NewCircle { name, region }),
        )
    }

    fn delete_circle(&self, id: RowId) -> ApiResult<Ack> {
        self.send(self.request(Method::DELETE, &format!("/delete_circle/{id}")))
    }

    fn list_documents(&self, member: RowId) -> ApiResult<Vec<Document>> {
        let list: DocumentList =
            self.send(self.request(Method::GET, &format!("/members/{member}/documents")))?;
        Ok(list.documents)
    }

    fn upload_document(&self, member: RowId, document_type: &str, file: &Path) -> ApiResult<Ack> {
        let form = Form::new()
            .text("document_type", document_type.to_string())
            .file("file", file)?;
        self.send(
            self.request(Method::POST, &format!("/members/{member}/documents"))
                .multipart(form),
        )
    }

    fn download_document(&self, id: RowId) -> ApiResult<Download> {
        let response =
            self.execute(self.request(Method::GET, &format!("/documents/{id}/download")))?;
        let filename = attachment_filename(&response, &format!("document-{id}"));
        let bytes = response.bytes()?.to_vec();
        debug!("Downloaded {filename} ({} bytes)", bytes.len());
        Ok(Download { filename, bytes })
    }

    fn delete_document(&self, id: RowId) -> ApiResult<Ack> {
        self.send(self.request(Method::DELETE, &format!("/documents/{id}")))
    }

    fn export_members(&self) -> ApiResult<Vec<u8>> {
        let response = self.execute(self.request(Method::GET, "/export_members"))?;
        Ok(response.bytes()?.to_vec())
    }

    fn import_members(&self, file: &Path) -> ApiResult<ImportReport> {
        let form = Form::new().file("file", file)?;
        self.send(self.request(Method::POST, "/import_members").multipart(form))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_prefers_json_fields() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(r#"{"error": "Niepoprawny email"}"#, status),
            "Niepoprawny email"
        );
        assert_eq!(
            error_message(r#"{"message": "Brak danych", "error": "x"}"#, status),
            "Brak danych"
        );
        assert_eq!(error_message("Brak pliku w żądaniu", status), "Brak pliku w żądaniu");
        assert_eq!(error_message("", status), "Bad Request");
    }

    #[test]
    fn error_field_on_success_is_a_rejection() {
        let err = decode::<Ack>(r#"{"error": "Koło nie znalezione"}"#, StatusCode::OK).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Rejected { status: 200, ref message } if message == "Koło nie znalezione"
        ));

        let ack: Ack = decode(r#"{"message": "Koło utworzone", "id": 4}"#, StatusCode::CREATED).unwrap();
        assert_eq!(ack.id, Some(4));
        assert_eq!(ack.text("ok"), "Koło utworzone");

        let empty: Ack = decode("", StatusCode::NO_CONTENT).unwrap();
        assert_eq!(empty, Ack::default());
    }

    #[test]
    fn member_page_tolerates_nulls() {
        let body = r#"{
            "members": [{
                "id": 3, "first_name": "Anna", "last_name": "Kowalska",
                "date_of_birth": "1990-01-01", "place_of_birth": null,
                "id_document_number": "90010112345", "phone_number": "600100200",
                "email": "anna@example.org", "contribution": null,
                "circle": "Kraków Centrum", "region": "małopolskie",
                "membership_form_scan": "uploads/90010112345.pdf"
            }],
            "total_pages": 4
        }"#;
        let page: MemberPage = decode(body, StatusCode::OK).unwrap();
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.members[0].contribution, None);
        assert_eq!(page.members[0].place_of_birth, None);
        assert_eq!(page.members[0].status, None);
    }

    #[test]
    fn disposition_filename_is_sanitized() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="skan 1.pdf""#).as_deref(),
            Some("skan 1.pdf")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn member_query_sends_every_param() {
        let query = MemberQuery {
            page: 2,
            limit: 10,
            search: "kowal".into(),
            status: Some("banned".into()),
        };
        assert_eq!(
            query.params(),
            vec![
                ("page", "2".to_string()),
                ("limit", "10".to_string()),
                ("search", "kowal".to_string()),
                ("status", "banned".to_string()),
            ]
        );
    }
}
