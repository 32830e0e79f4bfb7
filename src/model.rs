use arboard::Clipboard;
use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::api::{ApiError, ApiResult, MemberQuery};
use crate::domain::{HELP_TEXT, KeyMode, Message, RegConfig, RegError};
use crate::inputter::{InputResult, Inputter};
use crate::session::Session;
use crate::table::edit::{EditError, EditState, SaveOutcome, SaveRequest};
use crate::table::row::{Circle, Row, RowId};
use crate::table::{RowAction, Table, TableKind};
use crate::transfer;
use crate::ui::{CMDLINE_HEIGHT, TABLE_BORDER_HEIGHT, TABLE_HEADER_HEIGHT};
use crate::worker::{Completion, Job, Moderation};

pub const DOCUMENT_TYPES: [&str; 5] = [
    "Wniosek o członkostwo",
    "Dokument tożsamości",
    "Potwierdzenie adresu",
    "CV",
    "Inne",
];

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, PartialEq)]
pub enum Status {
    Ready,
    Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modus {
    Table,
    Edit,
    Prompt,
    Confirm,
    Popup,
    Login,
}

/// Input rejected before any request is sent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0:?} is not a valid email address")]
    InvalidEmail(String),
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("password needs at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,
    #[error("unknown document type {0:?}")]
    UnknownDocumentType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptKind {
    /// Live search, `previous` is restored when the prompt is cancelled.
    Search { previous: String },
    DeleteReason { id: RowId },
    BanReason { id: RowId },
    CircleName,
    CircleRegion { name: String },
    DocumentType { member: RowId },
    DocumentPath { member: RowId, document_type: String },
    ExportPath,
    ImportPath,
    AttachmentPath,
}

impl PromptKind {
    pub fn label(&self) -> String {
        match self {
            PromptKind::Search { .. } => "Search: ".to_string(),
            PromptKind::DeleteReason { .. } => "Reason for deletion: ".to_string(),
            PromptKind::BanReason { .. } => "Reason for ban: ".to_string(),
            PromptKind::CircleName => "Circle name: ".to_string(),
            PromptKind::CircleRegion { name } => format!("Region of {name}: "),
            PromptKind::DocumentType { .. } => {
                let choices: Vec<String> = DOCUMENT_TYPES
                    .iter()
                    .enumerate()
                    .map(|(idx, t)| format!("{}={t}", idx + 1))
                    .collect();
                format!("Document type ({}): ", choices.join(", "))
            }
            PromptKind::DocumentPath { document_type, .. } => format!("{document_type} file: "),
            PromptKind::ExportPath => "Export members to: ".to_string(),
            PromptKind::ImportPath => "Import members from: ".to_string(),
            PromptKind::AttachmentPath => "Declaration file: ".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmKind {
    Save,
    Delete { id: RowId },
    Ban { id: RowId },
    Unban { kind: TableKind, id: RowId },
    Purge { kind: TableKind, id: RowId },
    DeleteCircle { id: RowId },
    DeleteDocument { id: RowId },
}

impl ConfirmKind {
    pub fn question(&self) -> String {
        match self {
            ConfirmKind::Save => "Save the changes of this row?".to_string(),
            ConfirmKind::Delete { id } => format!("Delete member {id}?"),
            ConfirmKind::Ban { id } => format!("Ban member {id}?"),
            ConfirmKind::Unban { id, .. } => format!("Unban member {id}?"),
            ConfirmKind::Purge { id, .. } => {
                format!("Permanently delete member {id}? This can not be undone.")
            }
            ConfirmKind::DeleteCircle { id } => format!("Delete circle {id}?"),
            ConfirmKind::DeleteDocument { id } => format!("Delete document {id}?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Confirm {
    pub kind: ConfirmKind,
    pub yes_selected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingEdit {
    Row(RowId),
    Draft,
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub label: &'static str,
    pub input: Inputter,
}

impl FormField {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            input: Inputter::default(),
        }
    }

    fn secret(label: &'static str) -> Self {
        Self {
            label,
            input: Inputter::masked(),
        }
    }
}

/// Login or registration form shown while there is no session.
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub register: bool,
    pub fields: Vec<FormField>,
    pub focus: usize,
    pub error: Option<String>,
    pub pending: bool,
}

impl LoginForm {
    fn login() -> Self {
        Self {
            register: false,
            fields: vec![FormField::new("Email"), FormField::secret("Password")],
            focus: 0,
            error: None,
            pending: false,
        }
    }

    fn registration() -> Self {
        Self {
            register: true,
            fields: vec![
                FormField::new("Username"),
                FormField::new("Email"),
                FormField::secret("Password"),
                FormField::secret("Confirm password"),
            ],
            focus: 0,
            error: None,
            pending: false,
        }
    }

    fn toggle_register(&mut self) {
        *self = if self.register {
            Self::login()
        } else {
            Self::registration()
        };
    }

    fn focus_step(&mut self, forward: bool) {
        let len = self.fields.len();
        self.focus = if forward {
            (self.focus + 1) % len
        } else {
            (self.focus + len - 1) % len
        };
    }

    fn read(&mut self, key: KeyEvent) {
        if let Some(field) = self.fields.get_mut(self.focus) {
            field.input.read(key);
        }
    }

    fn value(&self, label: &str) -> &str {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.input.value())
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<Job, FormError> {
        if let Some(empty) = self.fields.iter().find(|f| f.input.value().trim().is_empty()) {
            return Err(FormError::Missing(empty.label));
        }
        let email = self.value("Email").trim().to_string();
        if !is_valid_email(&email) {
            return Err(FormError::InvalidEmail(email));
        }
        let password = self.value("Password").to_string();
        if !self.register {
            return Ok(Job::Login { email, password });
        }
        if password != self.value("Confirm password") {
            return Err(FormError::PasswordMismatch);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(FormError::PasswordTooShort);
        }
        Ok(Job::Register {
            username: self.value("Username").trim().to_string(),
            email,
            password,
        })
    }
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn parse_document_type(input: &str) -> Result<String, FormError> {
    let input = input.trim();
    if let Ok(number) = input.parse::<usize>()
        && let Some(name) = number.checked_sub(1).and_then(|idx| DOCUMENT_TYPES.get(idx))
    {
        return Ok(name.to_string());
    }
    DOCUMENT_TYPES
        .iter()
        .find(|t| t.to_lowercase() == input.to_lowercase())
        .map(|t| t.to_string())
        .ok_or_else(|| FormError::UnknownDocumentType(input.to_string()))
}

struct Tables {
    members: Table,
    circles: Table,
    banned: Table,
    deleted: Table,
    documents: Table,
}

impl Tables {
    fn new() -> Self {
        Self {
            members: Table::new(TableKind::Members),
            circles: Table::new(TableKind::Circles),
            banned: Table::new(TableKind::Banned),
            deleted: Table::new(TableKind::Deleted),
            documents: Table::new(TableKind::Documents),
        }
    }

    fn get(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::Members => &self.members,
            TableKind::Circles => &self.circles,
            TableKind::Banned => &self.banned,
            TableKind::Deleted => &self.deleted,
            TableKind::Documents => &self.documents,
        }
    }

    fn get_mut(&mut self, kind: TableKind) -> &mut Table {
        match kind {
            TableKind::Members => &mut self.members,
            TableKind::Circles => &mut self.circles,
            TableKind::Banned => &mut self.banned,
            TableKind::Deleted => &mut self.deleted,
            TableKind::Documents => &mut self.documents,
        }
    }
}

pub struct Model {
    config: RegConfig,
    session: Session,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    tables: Tables,
    current: TableKind,
    circles: Vec<Circle>,
    jobs: Vec<Job>,
    pending_edit: Option<PendingEdit>,
    input: Inputter,
    last_input: InputResult,
    prompt: Option<PromptKind>,
    confirm: Option<Confirm>,
    login: LoginForm,
    popup_title: String,
    popup_message: String,
    status_message: String,
    clipboard: Option<Clipboard>,
    page_height: usize,
}

impl Model {
    pub fn init(config: &RegConfig, session: Session) -> Self {
        let mut model = Self {
            config: config.clone(),
            session,
            status: Status::Ready,
            modus: Modus::Login,
            previous_modus: Modus::Login,
            tables: Tables::new(),
            current: TableKind::Members,
            circles: Vec::new(),
            jobs: Vec::new(),
            pending_edit: None,
            input: Inputter::default(),
            last_input: InputResult::default(),
            prompt: None,
            confirm: None,
            login: LoginForm::login(),
            popup_title: String::new(),
            popup_message: String::new(),
            status_message: String::new(),
            clipboard: None,
            page_height: 20,
        };
        if model.session.is_authenticated() {
            model.jobs.push(Job::Verify);
            model.start_session();
        } else {
            model.set_status_message("Please log in (Ctrl-R: register)");
        }
        model
    }

    /// Starts with a search query applied to the members table.
    pub fn with_search(mut self, query: &str) -> Self {
        self.tables.members.search(query);
        self
    }

    fn start_session(&mut self) {
        self.modus = Modus::Table;
        self.previous_modus = Modus::Table;
        self.load_table(self.current);
        if self.current != TableKind::Circles {
            self.jobs.push(Job::Circles { then_edit: false });
        }
        self.set_status_message(format!("Loading {} ...", self.current.title()));
    }

    /// Collaborator calls queued since the last call.
    pub fn take_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.jobs)
    }

    pub fn key_mode(&self) -> KeyMode {
        match self.modus {
            Modus::Table | Modus::Popup => KeyMode::Table,
            Modus::Edit => KeyMode::Edit,
            Modus::Prompt | Modus::Confirm | Modus::Login => KeyMode::Raw,
        }
    }

    pub fn modus(&self) -> Modus {
        self.modus
    }

    pub fn current_table(&self) -> &Table {
        self.tables.get(self.current)
    }

    fn current_table_mut(&mut self) -> &mut Table {
        self.tables.get_mut(self.current)
    }

    pub fn table(&self, kind: TableKind) -> &Table {
        self.tables.get(kind)
    }

    pub fn prompt(&self) -> Option<(&PromptKind, &InputResult)> {
        self.prompt.as_ref().map(|p| (p, &self.last_input))
    }

    pub fn confirm(&self) -> Option<&Confirm> {
        self.confirm.as_ref()
    }

    pub fn login_form(&self) -> &LoginForm {
        &self.login
    }

    pub fn popup(&self) -> (&str, &str) {
        (&self.popup_title, &self.popup_message)
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn server(&self) -> &str {
        self.config.base_url()
    }

    pub fn max_column_width(&self) -> usize {
        self.config.max_column_width
    }

    /// Pins the widths the renderer measured for `kind`.
    pub fn freeze_columns(&mut self, kind: TableKind, widths: &[u16]) {
        if self.tables.get_mut(kind).freezer.freeze(widths) {
            trace!("Froze {} columns of {}", widths.len(), kind.title());
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        trace!("Status: {}", self.status_message);
    }

    pub fn quit(&mut self) {
        self.status = Status::Quitting;
    }

    fn ui_resize(&mut self, width: u16, height: u16) {
        self.page_height = (height as usize)
            .saturating_sub(CMDLINE_HEIGHT + TABLE_BORDER_HEIGHT + TABLE_HEADER_HEIGHT)
            .max(1);
        trace!("UI was resized to w:{width} h:{height}, page height {}", self.page_height);
    }

    pub fn update(&mut self, message: Option<Message>) -> Result<(), RegError> {
        let Some(msg) = message else {
            return Ok(());
        };
        match msg {
            Message::Completed(completion) => {
                self.apply_completion(completion);
                return Ok(());
            }
            Message::Resize(width, height) => {
                self.ui_resize(width, height);
                return Ok(());
            }
            _ => {}
        }

        match self.modus {
            Modus::Table => self.update_table(msg)?,
            Modus::Edit => self.update_edit(msg),
            Modus::Popup => match msg {
                Message::Quit => self.quit(),
                Message::Exit | Message::Enter | Message::Help => self.close_popup(),
                _ => (),
            },
            Modus::Prompt => {
                if let Message::RawKey(key) = msg {
                    self.prompt_input(key)
                }
            }
            Modus::Confirm => {
                if let Message::RawKey(key) = msg {
                    self.confirm_input(key)
                }
            }
            Modus::Login => {
                if let Message::RawKey(key) = msg {
                    self.login_input(key)
                }
            }
        }
        Ok(())
    }

    fn update_table(&mut self, msg: Message) -> Result<(), RegError> {
        let page = self.page_height as isize;
        match msg {
            Message::Quit => self.quit(),
            Message::MoveUp => self.current_table_mut().move_rows(-1),
            Message::MoveDown => self.current_table_mut().move_rows(1),
            Message::MoveLeft => self.current_table_mut().move_columns(-1),
            Message::MoveRight => self.current_table_mut().move_columns(1),
            Message::MovePageUp => self.current_table_mut().move_rows(-page),
            Message::MovePageDown => self.current_table_mut().move_rows(page),
            Message::MoveBeginning => self.current_table_mut().curser_row = 0,
            Message::MoveEnd => self.current_table_mut().move_rows(isize::MAX),
            Message::Search => self.start_search(),
            Message::Sort => self.sort_current_column(),
            Message::Edit => self.request_edit(),
            Message::Delete => self.request_delete(),
            Message::Ban => {
                if let Some(id) = self.selected_for(RowAction::Ban) {
                    self.ask(ConfirmKind::Ban { id })
                }
            }
            Message::Unban => {
                if let Some(id) = self.selected_for(RowAction::Unban) {
                    let kind = self.current;
                    self.ask(ConfirmKind::Unban { kind, id })
                }
            }
            Message::Purge => {
                if let Some(id) = self.selected_for(RowAction::Purge) {
                    let kind = self.current;
                    self.ask(ConfirmKind::Purge { kind, id })
                }
            }
            Message::NewRow => self.new_row(),
            Message::NextView => self.next_view(),
            Message::Refresh => self.refresh(),
            Message::Export => self.enter_prompt(PromptKind::ExportPath, "members.csv"),
            Message::Import => self.enter_prompt(PromptKind::ImportPath, ""),
            Message::CopyCell => self.copy_table_cell(),
            Message::CopyRow => self.copy_table_row(),
            Message::Enter => self.enter(),
            Message::PrevPage => self.change_page(-1),
            Message::NextPage => self.change_page(1),
            Message::Help => self.show_help(),
            Message::Logout => self.logout()?,
            Message::Refreeze => {
                self.current_table_mut().freezer.unfreeze();
                self.set_status_message("Column widths will be measured again");
            }
            Message::Exit => self.exit(),
            _ => (),
        }
        Ok(())
    }

    fn update_edit(&mut self, msg: Message) {
        match msg {
            Message::Quit => self.quit(),
            Message::Save => self.ask(ConfirmKind::Save),
            Message::Exit => self.cancel_edit(),
            Message::FocusNext => self.tables.members.focus_step(true),
            Message::FocusPrev => self.tables.members.focus_step(false),
            Message::StepUp => self.edit_step(1),
            Message::StepDown => self.edit_step(-1),
            Message::Attach => self.enter_prompt(PromptKind::AttachmentPath, ""),
            Message::Search => self.start_search(),
            Message::Sort => self.sort_current_column(),
            Message::RawKey(key) => self.edit_input(key),
            _ => (),
        }
    }

    // -------------------- Table actions ---------------------- //

    fn load_table(&mut self, kind: TableKind) {
        let status = match kind {
            TableKind::Members => None,
            TableKind::Banned => Some("banned".to_string()),
            TableKind::Deleted => Some("deleted".to_string()),
            TableKind::Circles => {
                self.jobs.push(Job::Circles { then_edit: false });
                return;
            }
            TableKind::Documents => {
                if let Some(member) = self.tables.documents.owner {
                    self.jobs.push(Job::Documents { member });
                }
                return;
            }
        };
        let query = MemberQuery {
            page: self.tables.get(kind).page,
            limit: self.config.page_size,
            search: String::new(),
            status,
        };
        self.jobs.push(Job::Members { kind, query });
    }

    fn show_table(&mut self, kind: TableKind) {
        self.current = kind;
        let table = self.tables.get_mut(kind);
        table.freezer.request();
        if table.loaded {
            self.set_status_message(kind.title());
        } else {
            self.load_table(kind);
            self.set_status_message(format!("Loading {} ...", kind.title()));
        }
    }

    fn next_view(&mut self) {
        let next = TableKind::CYCLE
            .iter()
            .position(|k| *k == self.current)
            .map(|idx| (idx + 1) % TableKind::CYCLE.len())
            .unwrap_or(0);
        self.show_table(TableKind::CYCLE[next]);
    }

    fn refresh(&mut self) {
        if self.current_table().editing.is_some() {
            self.set_status_message("Finish editing before refreshing");
            return;
        }
        self.load_table(self.current);
        self.set_status_message(format!("Refreshing {} ...", self.current.title()));
    }

    fn change_page(&mut self, delta: isize) {
        if !matches!(
            self.current,
            TableKind::Members | TableKind::Banned | TableKind::Deleted
        ) {
            return;
        }
        let table = self.current_table_mut();
        if table.editing.is_some() {
            self.set_status_message("Finish editing before changing the page");
            return;
        }
        let page = table
            .page
            .saturating_add_signed(delta)
            .clamp(1, table.total_pages.max(1));
        if page != table.page {
            table.page = page;
            self.load_table(self.current);
            self.set_status_message(format!("Loading page {page} ..."));
        }
    }

    fn enter(&mut self) {
        let Some(id) = self.current_table().selected().map(|r| r.id) else {
            return;
        };
        match self.current {
            TableKind::Members => {
                self.jobs.push(Job::Documents { member: id });
                self.set_status_message(format!("Loading documents of member {id} ..."));
            }
            TableKind::Documents => {
                let dir = self.config.download_dir.clone();
                self.jobs.push(Job::Download { id, dir });
                self.set_status_message(format!("Downloading document {id} ..."));
            }
            _ => {}
        }
    }

    fn exit(&mut self) {
        if self.current == TableKind::Documents {
            self.show_table(TableKind::Members);
        } else if !self.current_table().query.is_empty() {
            self.current_table_mut().search("");
            self.set_status_message("Search cleared");
        }
    }

    fn start_search(&mut self) {
        let previous = self.current_table().query.clone();
        self.enter_prompt(
            PromptKind::Search {
                previous: previous.clone(),
            },
            &previous,
        );
    }

    fn sort_current_column(&mut self) {
        let table = self.current_table_mut();
        let column = table.curser_column;
        let title = table.columns.get(column).map(|c| c.title).unwrap_or_default();
        match table.sort_by(column) {
            Some(column_type) => {
                let direction = table.sort.direction;
                self.set_status_message(format!(
                    "Sorted by {title} {direction:?} ({column_type:?})"
                ));
            }
            None => self.set_status_message(format!("{title} can not be sorted")),
        }
    }

    /// Id of the selected row if `action` is offered for it right now.
    fn selected_for(&mut self, action: RowAction) -> Option<RowId> {
        let (saving, id, allowed) = {
            let table = self.current_table();
            let row = table.selected();
            (
                table.is_saving(),
                row.map(|r| r.id),
                row.is_some_and(|r| table.available_actions(r).contains(&action)),
            )
        };
        if saving {
            self.set_status_message("Wait until the row is saved");
            return None;
        }
        if !allowed {
            if id.is_some() {
                self.set_status_message(format!("{action:?} is not available here"));
            }
            return None;
        }
        id
    }

    fn request_delete(&mut self) {
        let Some(id) = self.selected_for(RowAction::Delete) else {
            return;
        };
        match self.current {
            TableKind::Members => self.ask(ConfirmKind::Delete { id }),
            TableKind::Circles => self.ask(ConfirmKind::DeleteCircle { id }),
            TableKind::Documents => self.ask(ConfirmKind::DeleteDocument { id }),
            _ => {}
        }
    }

    fn new_row(&mut self) {
        match self.current {
            TableKind::Members => {
                if self.tables.members.is_saving() {
                    self.set_status_message("Wait until the row is saved");
                    return;
                }
                self.pending_edit = Some(PendingEdit::Draft);
                self.jobs.push(Job::Circles { then_edit: true });
                self.set_status_message("Loading circles ...");
            }
            TableKind::Circles => self.enter_prompt(PromptKind::CircleName, ""),
            TableKind::Documents => {
                if let Some(member) = self.tables.documents.owner {
                    self.enter_prompt(PromptKind::DocumentType { member }, "")
                }
            }
            _ => self.set_status_message(format!(
                "Rows can not be added to {}",
                self.current.title()
            )),
        }
    }

    fn moderate(&mut self, kind: TableKind, id: RowId, action: Moderation) {
        debug!("Requesting {action:?} of {id} in {}", kind.title());
        self.jobs.push(Job::Moderate { kind, id, action });
        self.set_status_message("Working ...");
    }

    fn logout(&mut self) -> Result<(), RegError> {
        self.session.clear()?;
        self.tables = Tables::new();
        self.circles.clear();
        self.current = TableKind::Members;
        self.login = LoginForm::login();
        self.modus = Modus::Login;
        info!("Logged out");
        self.set_status_message("Logged out");
        Ok(())
    }

    // -------------------- Editing ---------------------- //

    fn request_edit(&mut self) {
        let table = self.current_table();
        if !table.supports(RowAction::Edit) {
            self.set_status_message(format!("Rows of {} can not be edited", self.current.title()));
            return;
        }
        let Some(row) = table.selected() else {
            return;
        };
        let id = row.id;
        if row.state() == EditState::Editing {
            // A save was rejected while the table had the focus.
            self.modus = Modus::Edit;
            return;
        }
        if table.is_saving() {
            self.set_status_message("Wait until the row is saved");
            return;
        }
        self.pending_edit = Some(PendingEdit::Row(id));
        self.jobs.push(Job::Circles { then_edit: true });
        self.set_status_message("Loading circles ...");
    }

    fn start_pending_edit(&mut self) {
        let Some(pending) = self.pending_edit.take() else {
            return;
        };
        if self.modus != Modus::Table {
            debug!("Dropping {pending:?}, modus is {:?}", self.modus);
            return;
        }
        let circles = self.circles.clone();
        let table = &mut self.tables.members;
        let result = match pending {
            PendingEdit::Row(id) => {
                table.select_row(id);
                if table.selected().map(|r| r.id) == Some(id) {
                    table.begin_edit(&circles)
                } else {
                    Err(EditError::UnknownRow(id))
                }
            }
            PendingEdit::Draft => table.insert_draft(&circles),
        };
        match result {
            Ok(id) => {
                self.current = TableKind::Members;
                self.modus = Modus::Edit;
                self.set_status_message(format!(
                    "Editing row {id}: Tab next field, Ctrl-S save, Esc cancel"
                ));
            }
            Err(e) => self.set_status_message(e.to_string()),
        }
    }

    fn cancel_edit(&mut self) {
        match self.tables.members.cancel_edit() {
            Ok(id) => {
                self.modus = Modus::Table;
                self.set_status_message(format!("Edit of row {id} cancelled"));
            }
            Err(e) => {
                self.modus = Modus::Table;
                self.set_status_message(e.to_string());
            }
        }
    }

    fn save_edit(&mut self) {
        match self.tables.members.begin_save() {
            Ok(request) => {
                info!("Saving row {}", request.id);
                self.jobs.push(Job::Save(request));
                self.modus = Modus::Table;
                self.set_status_message("Saving ...");
            }
            Err(e) => self.set_status_message(e.to_string()),
        }
    }

    fn edit_input(&mut self, key: KeyEvent) {
        let table = &mut self.tables.members;
        let focus = table.focus_field;
        let result = match key.code {
            KeyCode::Enter => {
                table.focus_step(true);
                Ok(())
            }
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::ALT) => match table.editing_row_mut() {
                Some(row) => row.input_char(focus, ch),
                None => Ok(()),
            },
            KeyCode::Backspace => match table.editing_row_mut() {
                Some(row) => row.input_backspace(focus),
                None => Ok(()),
            },
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.set_status_message(e.to_string());
        }
    }

    fn edit_step(&mut self, delta: i64) {
        let table = &mut self.tables.members;
        let focus = table.focus_field;
        let result = match table.editing_row_mut() {
            Some(row) => row.step(focus, delta),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.set_status_message(e.to_string());
        }
    }

    // -------------------- Prompts and confirmations ---------------------- //

    fn enter_prompt(&mut self, kind: PromptKind, preset: &str) {
        trace!("Entering prompt {kind:?}");
        self.previous_modus = self.modus;
        self.modus = Modus::Prompt;
        self.input.clear();
        self.input.set(preset);
        self.last_input = self.input.get();
        self.prompt = Some(kind);
    }

    fn prompt_input(&mut self, key: KeyEvent) {
        self.last_input = self.input.read(key);
        let Some(kind) = self.prompt.clone() else {
            self.modus = self.previous_modus;
            return;
        };

        if !self.last_input.finished {
            if let PromptKind::Search { .. } = kind {
                let query = self.last_input.input.clone();
                let visible = self.current_table_mut().search(&query);
                self.set_status_message(format!("{visible} rows match"));
            }
            return;
        }

        self.prompt = None;
        self.modus = self.previous_modus;
        let value = self.last_input.input.clone();
        if self.last_input.canceled {
            trace!("Prompt {kind:?} cancelled");
            if let PromptKind::Search { previous } = kind {
                self.current_table_mut().search(&previous);
            }
        } else {
            self.prompt_finished(kind, value);
        }
    }

    fn prompt_finished(&mut self, kind: PromptKind, value: String) {
        let value = value.trim().to_string();
        match kind {
            PromptKind::Search { .. } => {
                let visible = self.current_table().visible_count();
                self.set_status_message(format!("{visible} rows match {value:?}"));
            }
            _ if value.is_empty() => self.empty_prompt(kind),
            PromptKind::DeleteReason { id } => {
                self.moderate(TableKind::Members, id, Moderation::Delete { reason: value })
            }
            PromptKind::BanReason { id } => {
                self.moderate(TableKind::Members, id, Moderation::Ban { reason: value })
            }
            PromptKind::CircleName => {
                self.enter_prompt(PromptKind::CircleRegion { name: value }, "")
            }
            PromptKind::CircleRegion { name } => {
                self.jobs.push(Job::CreateCircle {
                    name,
                    region: value,
                });
                self.set_status_message("Creating circle ...");
            }
            PromptKind::DocumentType { member } => match parse_document_type(&value) {
                Ok(document_type) => self.enter_prompt(
                    PromptKind::DocumentPath {
                        member,
                        document_type,
                    },
                    "",
                ),
                Err(e) => self.set_status_message(e.to_string()),
            },
            PromptKind::DocumentPath {
                member,
                document_type,
            } => match existing_file(&value) {
                Ok(path) => {
                    self.jobs.push(Job::UploadDocument {
                        member,
                        document_type,
                        path,
                    });
                    self.set_status_message("Uploading document ...");
                }
                Err(e) => self.set_status_message(e.to_string()),
            },
            PromptKind::ExportPath => match transfer::expand_path(&value) {
                Ok(path) => {
                    self.jobs.push(Job::Export { path });
                    self.set_status_message("Exporting members ...");
                }
                Err(e) => self.set_status_message(e.to_string()),
            },
            PromptKind::ImportPath => match transfer::expand_path(&value) {
                Ok(path) => {
                    self.jobs.push(Job::Import { path });
                    self.set_status_message("Importing members ...");
                }
                Err(e) => self.set_status_message(e.to_string()),
            },
            PromptKind::AttachmentPath => self.choose_attachment(&value),
        }
    }

    /// Reasons and paths abort silently, form fields report what is missing.
    fn empty_prompt(&mut self, kind: PromptKind) {
        match kind {
            PromptKind::CircleName => self.set_status_message(FormError::Missing("name").to_string()),
            PromptKind::CircleRegion { .. } => {
                self.set_status_message(FormError::Missing("region").to_string())
            }
            other => trace!("Empty input for {other:?}, aborting"),
        }
    }

    fn choose_attachment(&mut self, raw: &str) {
        let result = existing_file(raw).and_then(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.tables.members.editing_row_mut() {
                Some(row) => row
                    .choose_attachment(path)
                    .map(|_| name)
                    .map_err(|e| RegError::LoadingFailed(e.to_string())),
                None => Err(RegError::LoadingFailed("no row is edited".to_string())),
            }
        });
        match result {
            Ok(name) => self.set_status_message(format!("{name} will be uploaded on save")),
            Err(e) => self.set_status_message(e.to_string()),
        }
    }

    fn ask(&mut self, kind: ConfirmKind) {
        trace!("Asking {kind:?}");
        self.previous_modus = self.modus;
        self.modus = Modus::Confirm;
        self.confirm = Some(Confirm {
            kind,
            yes_selected: true,
        });
    }

    fn confirm_input(&mut self, key: KeyEvent) {
        let Some(confirm) = self.confirm.as_mut() else {
            self.modus = self.previous_modus;
            return;
        };
        let decision = match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(true),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(false),
            KeyCode::Enter => Some(confirm.yes_selected),
            KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::BackTab => {
                confirm.yes_selected = !confirm.yes_selected;
                None
            }
            _ => None,
        };
        let Some(yes) = decision else {
            return;
        };
        let Some(confirm) = self.confirm.take() else {
            return;
        };
        self.modus = self.previous_modus;
        if yes {
            self.confirmed(confirm.kind);
        } else {
            trace!("{:?} cancelled", confirm.kind);
        }
    }

    fn confirmed(&mut self, kind: ConfirmKind) {
        match kind {
            ConfirmKind::Save => self.save_edit(),
            ConfirmKind::Delete { id } => self.enter_prompt(PromptKind::DeleteReason { id }, ""),
            ConfirmKind::Ban { id } => self.enter_prompt(PromptKind::BanReason { id }, ""),
            ConfirmKind::Unban { kind, id } => self.moderate(kind, id, Moderation::Unban),
            ConfirmKind::Purge { kind, id } => self.moderate(kind, id, Moderation::Purge),
            ConfirmKind::DeleteCircle { id } => {
                self.moderate(TableKind::Circles, id, Moderation::DeleteCircle)
            }
            ConfirmKind::DeleteDocument { id } => {
                self.moderate(TableKind::Documents, id, Moderation::DeleteDocument)
            }
        }
    }

    // -------------------- Popups ---------------------- //

    fn show_popup(&mut self, title: &str, message: impl Into<String>) {
        if self.modus != Modus::Popup {
            self.previous_modus = self.modus;
        }
        self.modus = Modus::Popup;
        self.popup_title = title.to_string();
        self.popup_message = message.into();
    }

    fn close_popup(&mut self) {
        trace!("Close popup ...");
        self.modus = self.previous_modus;
        self.previous_modus = Modus::Popup;
    }

    fn show_help(&mut self) {
        self.show_popup("Help", HELP_TEXT);
    }

    /// Error popup, or a status line message while a prompt or form owns the keys.
    fn notify(&mut self, title: &str, message: String) {
        error!("{title}: {message}");
        match self.modus {
            Modus::Table | Modus::Edit | Modus::Popup => self.show_popup(title, message),
            _ => self.set_status_message(format!("{title}: {message}")),
        }
    }

    fn notify_error(&mut self, title: &str, e: &ApiError) {
        if matches!(e, ApiError::Unauthorized) {
            return;
        }
        self.notify(title, e.user_message());
    }

    // -------------------- Clipboard ---------------------- //

    fn clipboard(&mut self) -> Option<&mut Clipboard> {
        if self.clipboard.is_none() {
            match Clipboard::new() {
                Ok(clipboard) => self.clipboard = Some(clipboard),
                Err(e) => warn!("No clipboard available: {e:?}"),
            }
        }
        self.clipboard.as_mut()
    }

    fn copy_to_clipboard(&mut self, content: String) {
        let result = self.clipboard().map(|c| c.set_text(content));
        match result {
            Some(Ok(_)) => {
                trace!("Copied content to clipboard.");
                self.set_status_message("Copied to clipboard");
            }
            Some(Err(e)) => {
                trace!("Error copying to clipboard: {:?}", e);
                self.set_status_message("Copy failed");
            }
            None => self.set_status_message("Clipboard is not available"),
        }
    }

    fn copy_table_cell(&mut self) {
        let table = self.current_table();
        let cell = table
            .selected()
            .map(|row| table.cell_text(row, table.curser_column));
        if let Some(cell) = cell {
            trace!("Cell content: {}", cell);
            self.copy_to_clipboard(cell);
        }
    }

    fn copy_table_row(&mut self) {
        if let Some(row) = self.current_table().selected_as_csv() {
            self.copy_to_clipboard(row);
        }
    }

    // -------------------- Login ---------------------- //

    fn login_input(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => self.quit(),
                KeyCode::Char('r') => self.login.toggle_register(),
                _ => {}
            }
            return;
        }
        match key.code {
            KeyCode::Esc => self.quit(),
            KeyCode::Tab | KeyCode::Down => self.login.focus_step(true),
            KeyCode::BackTab | KeyCode::Up => self.login.focus_step(false),
            KeyCode::Enter if self.login.focus + 1 < self.login.fields.len() => {
                self.login.focus_step(true)
            }
            KeyCode::Enter => self.submit_login(),
            _ => self.login.read(key),
        }
    }

    fn submit_login(&mut self) {
        if self.login.pending {
            return;
        }
        match self.login.validate() {
            Ok(job) => {
                self.login.pending = true;
                self.login.error = None;
                self.jobs.push(job);
                self.set_status_message("Logging in ...");
            }
            Err(e) => self.login.error = Some(e.to_string()),
        }
    }

    fn logged_in(&mut self, result: ApiResult<String>) {
        self.login.pending = false;
        match result {
            Ok(token) => {
                if let Err(e) = self.session.store(&token) {
                    warn!("Could not store session token: {e}");
                }
                info!("Logged in");
                self.login = LoginForm::login();
                self.start_session();
            }
            Err(ApiError::Unauthorized) => {
                self.login.error = Some("Invalid email or password".to_string())
            }
            Err(e) => self.login.error = Some(e.user_message()),
        }
    }

    fn session_expired(&mut self) {
        if self.modus == Modus::Login {
            return;
        }
        warn!("Session expired, switching to login");
        self.prompt = None;
        self.confirm = None;
        self.modus = Modus::Login;
        self.previous_modus = Modus::Table;
        self.login = LoginForm::login();
        self.login.error = Some("Session expired, please log in again".to_string());
        self.set_status_message("Session expired");
    }

    // -------------------- Completions ---------------------- //

    fn apply_completion(&mut self, completion: Completion) {
        if completion.is_unauthorized() {
            self.session_expired();
        }
        match completion {
            Completion::LoggedIn(result) => self.logged_in(result),
            Completion::Verified(result) => match result {
                Ok(_) => debug!("Stored session is valid"),
                Err(ApiError::Unauthorized) => {}
                Err(e) => warn!("Could not verify the stored session: {e}"),
            },
            Completion::Members { kind, result } => match result {
                Ok(page) => {
                    let table = self.tables.get_mut(kind);
                    if table.editing.is_some() {
                        warn!("Dropping {} refresh, a row is edited", kind.title());
                        return;
                    }
                    let editable = kind == TableKind::Members;
                    table.fill(
                        page.members
                            .iter()
                            .map(|m| Row::from_member(m, editable))
                            .collect(),
                    );
                    table.total_pages = page.total_pages.max(1);
                    let message = format!(
                        "{}: page {}/{}, {} rows",
                        kind.title(),
                        table.page,
                        table.total_pages,
                        table.rows.len()
                    );
                    self.set_status_message(message);
                }
                Err(e) => self.notify_error(&format!("Loading {} failed", kind.title()), &e),
            },
            Completion::Circles { then_edit, result } => {
                match result {
                    Ok(circles) => {
                        self.tables
                            .circles
                            .fill(circles.iter().map(Row::from).collect());
                        self.circles = circles;
                        if !then_edit {
                            let count = self.circles.len();
                            self.set_status_message(format!("{count} circles"));
                        }
                    }
                    Err(e) if then_edit => {
                        warn!("Editing with cached circles: {e}");
                        self.set_status_message(format!("Circles not refreshed: {}", e.user_message()));
                    }
                    Err(e) => self.notify_error("Loading circles failed", &e),
                }
                if then_edit {
                    self.start_pending_edit();
                }
            }
            Completion::Saved {
                request, outcome, ..
            } => self.saved(request, outcome),
            Completion::Moderated {
                kind,
                id,
                action,
                result,
            } => match result {
                Ok(ack) => self.moderated(kind, id, action, ack.message),
                Err(e) => self.notify_error("Request failed", &e),
            },
            Completion::CircleCreated(result) => match result {
                Ok(ack) => {
                    self.jobs.push(Job::Circles { then_edit: false });
                    self.set_status_message(ack.text("Circle created"));
                }
                Err(e) => self.notify_error("Creating circle failed", &e),
            },
            Completion::Documents { member, result } => match result {
                Ok(documents) => {
                    let table = &mut self.tables.documents;
                    table.owner = Some(member);
                    table.fill(documents.iter().map(Row::from).collect());
                    if self.modus == Modus::Table {
                        self.show_table(TableKind::Documents);
                    }
                    self.set_status_message(format!(
                        "{} documents of member {member} (n: upload, Esc: back)",
                        documents.len()
                    ));
                }
                Err(e) => self.notify_error("Loading documents failed", &e),
            },
            Completion::DocumentUploaded { member, result } => match result {
                Ok(ack) => {
                    self.jobs.push(Job::Documents { member });
                    self.set_status_message(ack.text("Document uploaded"));
                }
                Err(e) => self.notify_error("Upload failed", &e),
            },
            Completion::Downloaded(result) => match result {
                Ok(path) => self.set_status_message(format!("Saved {}", path.display())),
                Err(e) => self.notify_failure("Download failed", e),
            },
            Completion::Exported(result) => match result {
                Ok(path) => self.set_status_message(format!("Exported to {}", path.display())),
                Err(e) => self.notify_failure("Export failed", e),
            },
            Completion::Imported(result) => match result {
                Ok(report) => {
                    let mut text = report.message.clone();
                    for line in &report.errors {
                        text.push_str("\n  ");
                        text.push_str(line);
                    }
                    self.load_table(TableKind::Members);
                    self.show_popup("Import", text);
                }
                Err(e) => self.notify_failure("Import failed", e),
            },
        }
    }

    fn notify_failure(&mut self, title: &str, e: RegError) {
        match e {
            RegError::Api(api) => self.notify_error(title, &api),
            other => self.notify(title, other.to_string()),
        }
    }

    fn saved(&mut self, request: SaveRequest, outcome: SaveOutcome) {
        let table = &mut self.tables.members;
        match table.complete_save(&request, &outcome) {
            Ok(EditState::Viewing) => {
                if let Ok(Some(id)) = outcome.fields {
                    table.select_row(id);
                }
                match outcome.attachment {
                    Some(Err(message)) => self.notify("Declaration upload failed", message),
                    _ => self.set_status_message("Saved"),
                }
            }
            Ok(_) => {
                if self.modus == Modus::Table && self.current == TableKind::Members {
                    self.modus = Modus::Edit;
                }
                let message = outcome.fields.err().unwrap_or_default();
                if !matches!(self.modus, Modus::Login) {
                    self.notify("Save failed", message);
                }
            }
            Err(e) => {
                error!("Save completion for row {} not applied: {e}", request.id);
                self.set_status_message(e.to_string());
            }
        }
    }

    fn moderated(&mut self, kind: TableKind, id: RowId, action: Moderation, message: Option<String>) {
        let done = match &action {
            Moderation::Delete { .. } => {
                self.tables.deleted.loaded = false;
                "Member deleted"
            }
            Moderation::Ban { .. } => {
                self.tables.banned.loaded = false;
                "Member banned"
            }
            Moderation::Unban => {
                self.tables.banned.loaded = false;
                self.tables.members.loaded = false;
                "Member unbanned"
            }
            Moderation::Purge => "Member removed permanently",
            Moderation::DeleteCircle => {
                self.circles.retain(|c| c.id != id);
                "Circle deleted"
            }
            Moderation::DeleteDocument => "Document deleted",
        };

        let table = self.tables.get_mut(kind);
        match (&action, kind) {
            (Moderation::Unban, TableKind::Members) => {
                if let Some(row) = table.row_mut(id) {
                    row.banned = false;
                }
                table.loaded = true;
            }
            _ => {
                table.remove_row(id);
            }
        }
        info!("{done}: {id}");
        self.set_status_message(message.unwrap_or_else(|| done.to_string()));
    }
}

fn existing_file(raw: &str) -> Result<std::path::PathBuf, RegError> {
    let path = transfer::expand_path(raw)?;
    Ok(transfer::get_file_info(path)?.path)
}
