//! Runs collaborator calls on the rayon pool and hands the results back to
//! the UI thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use tracing::{debug, trace, warn};

use crate::api::{Ack, ApiError, ApiResult, Document, ImportReport, MemberPage, MemberQuery, RegistryApi};
use crate::domain::{RegError, RouteStyle};
use crate::table::TableKind;
use crate::table::edit::{SaveOutcome, SaveRequest};
use crate::table::row::{Circle, RowId};
use crate::transfer;

/// Row level operation that ends with the row being removed or restyled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Moderation {
    Delete { reason: String },
    Ban { reason: String },
    Unban,
    Purge,
    DeleteCircle,
    DeleteDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Login {
        email: String,
        password: String,
    },
    Register {
        username: String,
        email: String,
        password: String,
    },
    /// Checks a token restored from the token file.
    Verify,
    Members {
        kind: TableKind,
        query: MemberQuery,
    },
    /// Circle list, optionally followed by opening the selected row for editing.
    Circles {
        then_edit: bool,
    },
    Save(SaveRequest),
    Moderate {
        kind: TableKind,
        id: RowId,
        action: Moderation,
    },
    CreateCircle {
        name: String,
        region: String,
    },
    Documents {
        member: RowId,
    },
    UploadDocument {
        member: RowId,
        document_type: String,
        path: PathBuf,
    },
    Download {
        id: RowId,
        dir: PathBuf,
    },
    Export {
        path: PathBuf,
    },
    Import {
        path: PathBuf,
    },
}

#[derive(Debug)]
pub enum Completion {
    LoggedIn(ApiResult<String>),
    Verified(ApiResult<Ack>),
    Members {
        kind: TableKind,
        result: ApiResult<MemberPage>,
    },
    Circles {
        then_edit: bool,
        result: ApiResult<Vec<Circle>>,
    },
    Saved {
        request: SaveRequest,
        outcome: SaveOutcome,
        expired: bool,
    },
    Moderated {
        kind: TableKind,
        id: RowId,
        action: Moderation,
        result: ApiResult<Ack>,
    },
    CircleCreated(ApiResult<Ack>),
    Documents {
        member: RowId,
        result: ApiResult<Vec<Document>>,
    },
    DocumentUploaded {
        member: RowId,
        result: ApiResult<Ack>,
    },
    Downloaded(Result<PathBuf, RegError>),
    Exported(Result<PathBuf, RegError>),
    Imported(Result<ImportReport, RegError>),
}

impl Completion {
    /// True when the server rejected the session token.
    pub fn is_unauthorized(&self) -> bool {
        fn api<T>(r: &ApiResult<T>) -> bool {
            matches!(r, Err(ApiError::Unauthorized))
        }
        fn reg<T>(r: &Result<T, RegError>) -> bool {
            matches!(r, Err(RegError::Api(ApiError::Unauthorized)))
        }
        match self {
            Completion::LoggedIn(_) => false,
            Completion::Verified(result) => api(result),
            Completion::Members { result, .. } => api(result),
            Completion::Circles { result, .. } => api(result),
            Completion::Saved { expired, .. } => *expired,
            Completion::Moderated { result, .. } => api(result),
            Completion::CircleCreated(result) => api(result),
            Completion::Documents { result, .. } => api(result),
            Completion::DocumentUploaded { result, .. } => api(result),
            Completion::Downloaded(result) => reg(result),
            Completion::Exported(result) => reg(result),
            Completion::Imported(result) => reg(result),
        }
    }
}

fn save(api: &dyn RegistryApi, routes: RouteStyle, request: SaveRequest) -> Completion {
    let mut expired = false;
    let mut note = |e: &ApiError| {
        expired |= matches!(e, ApiError::Unauthorized);
        e.user_message()
    };

    let (fields, target) = if request.draft {
        match api.create_member(&request.fields) {
            Ok(ack) => match ack.id {
                Some(id) => (Ok(Some(id)), Some(id)),
                None => (Err("server did not return the new member id".to_string()), None),
            },
            Err(e) => (Err(note(&e)), None),
        }
    } else {
        (Ok(None), Some(request.id))
    };

    let attachment = match (&request.attachment, target) {
        (Some(path), Some(id)) => Some(
            api.update_declaration(id, path)
                .map(|ack| ack.filename.unwrap_or_default())
                .map_err(|e| note(&e)),
        ),
        _ => None,
    };

    let fields = if request.draft {
        fields
    } else {
        api.update_member(request.id, &request.fields, routes)
            .map(|_| None)
            .map_err(|e| note(&e))
    };

    Completion::Saved {
        request,
        outcome: SaveOutcome { fields, attachment },
        expired,
    }
}

fn moderate(api: &dyn RegistryApi, routes: RouteStyle, id: RowId, action: &Moderation) -> ApiResult<Ack> {
    match action {
        Moderation::Delete { reason } => api.delete_member(id, reason, routes),
        Moderation::Ban { reason } => api.ban_member(id, reason),
        Moderation::Unban => api.unban_member(id),
        Moderation::Purge => api.purge_member(id),
        Moderation::DeleteCircle => api.delete_circle(id),
        Moderation::DeleteDocument => api.delete_document(id),
    }
}

/// Runs one job to completion on the calling thread.
pub fn execute(api: &dyn RegistryApi, routes: RouteStyle, job: Job) -> Completion {
    trace!("Executing {job:?}");
    match job {
        Job::Login { email, password } => Completion::LoggedIn(api.login(&email, &password)),
        Job::Register {
            username,
            email,
            password,
        } => Completion::LoggedIn(api.register(&username, &email, &password)),
        Job::Verify => Completion::Verified(api.verify_session()),
        Job::Members { kind, query } => Completion::Members {
            kind,
            result: api.list_members(&query),
        },
        Job::Circles { then_edit } => Completion::Circles {
            then_edit,
            result: api.list_circles(),
        },
        Job::Save(request) => save(api, routes, request),
        Job::Moderate { kind, id, action } => Completion::Moderated {
            kind,
            id,
            result: moderate(api, routes, id, &action),
            action,
        },
        Job::CreateCircle { name, region } => {
            Completion::CircleCreated(api.create_circle(&name, &region))
        }
        Job::Documents { member } => Completion::Documents {
            member,
            result: api.list_documents(member),
        },
        Job::UploadDocument {
            member,
            document_type,
            path,
        } => Completion::DocumentUploaded {
            member,
            result: api.upload_document(member, &document_type, &path),
        },
        Job::Download { id, dir } => Completion::Downloaded(
            api.download_document(id)
                .map_err(RegError::from)
                .and_then(|d| transfer::write_download(&dir, &d)),
        ),
        Job::Export { path } => Completion::Exported(
            api.export_members()
                .map_err(RegError::from)
                .and_then(|bytes| transfer::write_export(&path, &bytes)),
        ),
        Job::Import { path } => Completion::Imported(
            transfer::preflight(path)
                .and_then(|summary| Ok(api.import_members(&summary.path)?)),
        ),
    }
}

pub struct Worker {
    api: Arc<dyn RegistryApi>,
    routes: RouteStyle,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: usize,
}

impl Worker {
    pub fn new(api: Arc<dyn RegistryApi>, routes: RouteStyle) -> Self {
        let (tx, rx) = channel();
        Self {
            api,
            routes,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn submit(&mut self, job: Job) {
        debug!("Submitting job {job:?}");
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let routes = self.routes;
        self.in_flight += 1;
        rayon::spawn(move || {
            let completion = execute(api.as_ref(), routes, job);
            if tx.send(completion).is_err() {
                warn!("Completion dropped, receiver is gone");
            }
        });
    }

    /// Completions that arrived since the last call, in arrival order.
    pub fn poll(&mut self) -> Vec<Completion> {
        let done: Vec<Completion> = self.rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}
