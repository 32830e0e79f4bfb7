use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::table::edit::EditState;

/// Stable identifier of a row (member, circle or document id).
pub type RowId = u64;

/// Display value of an empty contribution.
pub const NONE_SENTINEL: &str = "none";

/// Field whose value follows the selected circle.
pub const REGION_FIELD: &str = "region";

/// Prefix of links pointing to uploaded declaration scans.
pub const UPLOADS_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Text,
    Date,
    Number,
    CircleSelect,
    Immutable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub id: u64,
    pub name: String,
    pub region: String,
}

/// The transient input control shown instead of a field's text while its row is edited.
#[derive(Debug, Clone, PartialEq)]
pub enum Editor {
    /// Free text. `select_all` replaces the whole value on the next keystroke.
    Text { value: String, select_all: bool },
    /// ISO `YYYY-MM-DD` date.
    Date(String),
    /// Non-negative integer, may be empty.
    Number(String),
    CircleSelect {
        options: Vec<Circle>,
        selected: Option<usize>,
    },
}

impl Editor {
    /// Value this editor would submit. A circle select without selection has none.
    pub fn value(&self) -> Option<String> {
        match self {
            Editor::Text { value, .. } => Some(value.clone()),
            Editor::Date(value) => Some(value.clone()),
            Editor::Number(value) => Some(value.clone()),
            Editor::CircleSelect { options, selected } => {
                selected.and_then(|idx| options.get(idx)).map(|c| c.name.clone())
            }
        }
    }

    pub fn selected_circle(&self) -> Option<&Circle> {
        match self {
            Editor::CircleSelect { options, selected } => selected.and_then(|idx| options.get(idx)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub display_value: String,
    pub edit_kind: EditKind,
    /// Snapshot taken when the row enters edit state, used by cancel.
    pub original_value: Option<String>,
    /// When set, the editor is what renders instead of `display_value`.
    pub editor: Option<Editor>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>, edit_kind: EditKind) -> Self {
        Self {
            name: name.into(),
            display_value: value.into(),
            edit_kind,
            original_value: None,
            editor: None,
        }
    }

    /// Text currently visible for this field.
    pub fn shown(&self) -> String {
        match &self.editor {
            Some(editor) => editor.value().unwrap_or_else(|| self.display_value.clone()),
            None => self.display_value.clone(),
        }
    }

    /// Value submitted on save: the editor wins over the static text.
    pub fn submitted(&self) -> String {
        self.editor
            .as_ref()
            .and_then(Editor::value)
            .unwrap_or_else(|| self.display_value.trim().to_string())
    }

    pub fn is_editable(&self) -> bool {
        self.edit_kind != EditKind::Immutable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentState {
    #[default]
    View,
    Edit,
}

/// The declaration scan that accompanies a member row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attachment {
    pub link: Option<String>,
    pub state: AttachmentState,
    pub chosen_file: Option<PathBuf>,
    pub(crate) snapshot: Option<Box<Attachment>>,
}

impl Attachment {
    pub fn new(link: Option<String>) -> Self {
        Self {
            link,
            ..Default::default()
        }
    }

    /// Builds the attachment from a stored scan path such as `uploads/123.pdf`.
    pub fn from_scan_path(scan: Option<&str>) -> Self {
        let link = scan.filter(|s| !s.is_empty()).map(|s| {
            let name = s.rsplit(['/', '\\']).next().unwrap_or(s);
            format!("{UPLOADS_PREFIX}{name}")
        });
        Attachment::new(link)
    }

    pub fn label(&self) -> String {
        match (self.state, &self.chosen_file, &self.link) {
            (AttachmentState::Edit, Some(path), _) => format!(
                "⇪ {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            ),
            (AttachmentState::Edit, None, _) => "⇪ choose…".to_string(),
            (AttachmentState::View, _, Some(link)) => link
                .rsplit('/')
                .next()
                .unwrap_or(link.as_str())
                .to_string(),
            (AttachmentState::View, _, None) => "—".to_string(),
        }
    }

    /// Points the link at `{key}.{ext}` keeping directory and extension.
    pub fn rename_to_key(&mut self, key: &str) {
        if let Some(link) = &self.link {
            let (dir, file) = match link.rfind('/') {
                Some(pos) => (&link[..=pos], &link[pos + 1..]),
                None => ("", link.as_str()),
            };
            let renamed = match Path::new(file).extension() {
                Some(ext) => format!("{dir}{key}.{}", ext.to_string_lossy()),
                None => format!("{dir}{key}"),
            };
            self.link = Some(renamed);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub fields: Vec<Field>,
    pub attachment: Option<Attachment>,
    pub visible: bool,
    pub banned: bool,
    /// Not yet stored on the server.
    pub draft: bool,
    pub(crate) state: EditState,
}

impl Row {
    pub fn new(id: RowId, fields: Vec<Field>) -> Self {
        Self {
            id,
            fields,
            attachment: None,
            visible: true,
            banned: false,
            draft: false,
            state: EditState::Viewing,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Visible text of the cell at `idx`, empty when out of range.
    pub fn cell(&self, idx: usize) -> String {
        self.fields.get(idx).map(Field::shown).unwrap_or_default()
    }

    pub fn cells(&self) -> Vec<String> {
        self.fields.iter().map(Field::shown).collect()
    }
}
