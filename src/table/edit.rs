//! Inline edit state machine of a single row.
//!
//! `Viewing → Editing → Saving → Viewing`, or `Editing → Viewing` on cancel.
//! Transitions out of `Saving` happen only in [`Row::complete_save`], after
//! the collaborator answered.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Days, NaiveDate};
use thiserror::Error;
use tracing::{debug, trace};

use crate::table::row::{
    AttachmentState, Circle, EditKind, Editor, NONE_SENTINEL, REGION_FIELD, Row, RowId,
    UPLOADS_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditState {
    #[default]
    Viewing,
    Editing,
    Saving,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("row {0} is already being edited")]
    NotViewing(RowId),
    #[error("row {0} is not being edited")]
    NotEditing(RowId),
    #[error("row {0} is still being saved")]
    SaveInFlight(RowId),
    #[error("field {0} can not be edited")]
    NotEditable(String),
    #[error("row has no declaration section")]
    NoAttachment,
    #[error("no row with id {0}")]
    UnknownRow(RowId),
}

/// Field values keyed by field name, sent as one JSON object.
pub type FieldMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub id: RowId,
    pub draft: bool,
    pub fields: FieldMap,
    pub attachment: Option<PathBuf>,
    /// New value of the key field, set only when it changed.
    pub new_key: Option<String>,
}

/// What the collaborator answered to a [`SaveRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// Field update result; carries the server id when a draft was created.
    pub fields: Result<Option<RowId>, String>,
    /// Declaration upload result with the stored filename, if one was sent.
    pub attachment: Option<Result<String, String>>,
}

impl Row {
    /// Snapshots every field and installs editors.
    pub fn begin_edit(&mut self, circles: &[Circle]) -> Result<(), EditError> {
        match self.state {
            EditState::Viewing => {}
            EditState::Editing => return Err(EditError::NotViewing(self.id)),
            EditState::Saving => return Err(EditError::SaveInFlight(self.id)),
        }

        for field in self.fields.iter_mut() {
            field.original_value = Some(field.display_value.clone());
            let original = field.display_value.trim().to_string();
            field.editor = match field.edit_kind {
                EditKind::Immutable => None,
                EditKind::Date => Some(Editor::Date(original)),
                EditKind::Number => Some(Editor::Number(number_editor_value(&original))),
                EditKind::CircleSelect => Some(Editor::CircleSelect {
                    options: circles.to_vec(),
                    selected: circles.iter().position(|c| c.name == original),
                }),
                EditKind::Text => Some(Editor::Text {
                    value: original,
                    select_all: true,
                }),
            };
        }

        // The region is re-derived from the circle assigned at entry time,
        // a circle missing from the list leaves it empty.
        let derived_region = self.fields.iter().find_map(|f| match &f.editor {
            Some(editor @ Editor::CircleSelect { .. }) => Some(
                editor
                    .selected_circle()
                    .map(|c| c.region.clone())
                    .unwrap_or_default(),
            ),
            _ => None,
        });
        if let Some(region) = derived_region
            && let Some(field) = self.field_mut(REGION_FIELD)
        {
            field.display_value = region;
        }

        if let Some(attachment) = self.attachment.as_mut() {
            let mut saved = attachment.clone();
            saved.snapshot = None;
            attachment.snapshot = Some(Box::new(saved));
            attachment.state = AttachmentState::Edit;
            attachment.chosen_file = None;
        }

        self.state = EditState::Editing;
        debug!("Row {} entered edit state", self.id);
        Ok(())
    }

    /// Restores the snapshot. No request is involved.
    pub fn cancel_edit(&mut self) -> Result<(), EditError> {
        self.ensure_editing()?;
        for field in self.fields.iter_mut() {
            if let Some(original) = field.original_value.take() {
                field.display_value = original;
            }
            field.editor = None;
        }
        if let Some(attachment) = self.attachment.as_mut() {
            if let Some(saved) = attachment.snapshot.take() {
                *attachment = *saved;
            }
            attachment.chosen_file = None;
            attachment.state = AttachmentState::View;
        }
        self.state = EditState::Viewing;
        debug!("Row {} edit cancelled", self.id);
        Ok(())
    }

    /// Collects the field map and moves to `Saving`.
    pub fn begin_save(&mut self, key_field: Option<&str>) -> Result<SaveRequest, EditError> {
        self.ensure_editing()?;

        let fields: FieldMap = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.submitted()))
            .collect();

        let new_key = key_field
            .and_then(|name| self.field(name))
            .filter(|f| f.original_value.as_deref().map(str::trim) != Some(f.submitted().as_str()))
            .map(|f| f.submitted())
            .filter(|key| !key.is_empty());

        let attachment = self
            .attachment
            .as_ref()
            .and_then(|a| a.chosen_file.clone());

        self.state = EditState::Saving;
        trace!("Row {} saving {} fields", self.id, fields.len());
        Ok(SaveRequest {
            id: self.id,
            draft: self.draft,
            fields,
            attachment,
            new_key,
        })
    }

    /// Applies the collaborator answer. On a rejected field update the row
    /// goes back to `Editing` with its editors untouched.
    pub fn complete_save(
        &mut self,
        request: &SaveRequest,
        outcome: &SaveOutcome,
    ) -> Result<(), EditError> {
        if self.state != EditState::Saving {
            return Err(EditError::NotEditing(self.id));
        }

        let stored_file = match &outcome.attachment {
            Some(Ok(filename)) => Some(filename.clone()),
            _ => None,
        };

        match &outcome.fields {
            Ok(created) => {
                for field in self.fields.iter_mut() {
                    if let Some(editor) = field.editor.take() {
                        field.display_value = match editor {
                            Editor::Number(value) if value.trim().is_empty() => {
                                NONE_SENTINEL.to_string()
                            }
                            other => other
                                .value()
                                .unwrap_or_else(|| field.display_value.clone()),
                        };
                    }
                    field.original_value = None;
                }

                if let Some(attachment) = self.attachment.as_mut() {
                    match (&stored_file, &outcome.attachment) {
                        (Some(filename), _) => {
                            attachment.link = Some(format!("{UPLOADS_PREFIX}{filename}"));
                        }
                        (None, Some(_)) => {
                            if let Some(saved) = attachment.snapshot.as_ref() {
                                attachment.link = saved.link.clone();
                            }
                        }
                        (None, None) => {
                            if let Some(key) = &request.new_key {
                                attachment.rename_to_key(key);
                            }
                        }
                    }
                    attachment.snapshot = None;
                    attachment.chosen_file = None;
                    attachment.state = AttachmentState::View;
                }

                if let Some(id) = created {
                    self.id = *id;
                }
                self.draft = false;
                self.state = EditState::Viewing;
                debug!("Row {} saved", self.id);
            }
            Err(message) => {
                if let (Some(filename), Some(attachment)) = (&stored_file, self.attachment.as_mut())
                {
                    let link = format!("{UPLOADS_PREFIX}{filename}");
                    attachment.link = Some(link.clone());
                    attachment.chosen_file = None;
                    if let Some(saved) = attachment.snapshot.as_mut() {
                        saved.link = Some(link);
                    }
                }
                self.state = EditState::Editing;
                debug!("Row {} save rejected: {message}", self.id);
            }
        }
        Ok(())
    }

    /// Selects a circle option and updates the dependent region, locally.
    pub fn select_circle(&mut self, field_idx: usize, option: usize) -> Result<(), EditError> {
        self.ensure_editing()?;
        let region = match self.fields.get_mut(field_idx).and_then(|f| f.editor.as_mut()) {
            Some(Editor::CircleSelect { options, selected }) if option < options.len() => {
                *selected = Some(option);
                options[option].region.clone()
            }
            _ => return Err(self.not_editable(field_idx)),
        };
        if let Some(field) = self.field_mut(REGION_FIELD) {
            field.display_value = region;
        }
        Ok(())
    }

    /// Types a character into the editor of the given field.
    pub fn input_char(&mut self, field_idx: usize, ch: char) -> Result<(), EditError> {
        self.ensure_editing()?;
        match self.fields.get_mut(field_idx).and_then(|f| f.editor.as_mut()) {
            Some(Editor::Text { value, select_all }) => {
                if *select_all {
                    value.clear();
                    *select_all = false;
                }
                value.push(ch);
            }
            Some(Editor::Date(value)) if (ch.is_ascii_digit() || ch == '-') && value.len() < 10 => {
                value.push(ch)
            }
            Some(Editor::Number(value)) if ch.is_ascii_digit() => {
                if value == "0" {
                    value.clear();
                }
                value.push(ch)
            }
            Some(Editor::Date(_)) | Some(Editor::Number(_)) => {}
            _ => return Err(self.not_editable(field_idx)),
        }
        Ok(())
    }

    pub fn input_backspace(&mut self, field_idx: usize) -> Result<(), EditError> {
        self.ensure_editing()?;
        match self.fields.get_mut(field_idx).and_then(|f| f.editor.as_mut()) {
            Some(Editor::Text { value, select_all }) => {
                if *select_all {
                    value.clear();
                    *select_all = false;
                } else {
                    value.pop();
                }
            }
            Some(Editor::Date(value)) | Some(Editor::Number(value)) => {
                value.pop();
            }
            _ => return Err(self.not_editable(field_idx)),
        }
        Ok(())
    }

    /// Steps numbers by one, dates by one day and circles by one option.
    pub fn step(&mut self, field_idx: usize, delta: i64) -> Result<(), EditError> {
        self.ensure_editing()?;
        let circle_choice = match self.fields.get_mut(field_idx).and_then(|f| f.editor.as_mut()) {
            Some(Editor::Number(value)) => {
                let current = value.trim().parse::<u64>().unwrap_or(0);
                *value = current.saturating_add_signed(delta).to_string();
                None
            }
            Some(Editor::Date(value)) => {
                if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                    let moved = if delta >= 0 {
                        date.checked_add_days(Days::new(delta.unsigned_abs()))
                    } else {
                        date.checked_sub_days(Days::new(delta.unsigned_abs()))
                    };
                    if let Some(moved) = moved {
                        *value = moved.format("%Y-%m-%d").to_string();
                    }
                }
                None
            }
            Some(Editor::CircleSelect { options, selected }) if !options.is_empty() => {
                let len = options.len() as i64;
                let next = match selected {
                    Some(idx) => (*idx as i64 + delta).rem_euclid(len),
                    None if delta >= 0 => 0,
                    None => len - 1,
                };
                Some(next as usize)
            }
            Some(Editor::CircleSelect { .. }) | Some(Editor::Text { .. }) => None,
            None => return Err(self.not_editable(field_idx)),
        };
        if let Some(option) = circle_choice {
            self.select_circle(field_idx, option)?;
        }
        Ok(())
    }

    /// Stores the declaration file picked while editing.
    pub fn choose_attachment(&mut self, path: PathBuf) -> Result<(), EditError> {
        self.ensure_editing()?;
        match self.attachment.as_mut() {
            Some(attachment) if attachment.state == AttachmentState::Edit => {
                attachment.chosen_file = Some(path);
                Ok(())
            }
            _ => Err(EditError::NoAttachment),
        }
    }

    fn ensure_editing(&self) -> Result<(), EditError> {
        match self.state {
            EditState::Editing => Ok(()),
            EditState::Saving => Err(EditError::SaveInFlight(self.id)),
            EditState::Viewing => Err(EditError::NotEditing(self.id)),
        }
    }

    fn not_editable(&self, field_idx: usize) -> EditError {
        EditError::NotEditable(
            self.fields
                .get(field_idx)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("#{field_idx}")),
        )
    }
}

fn number_editor_value(display: &str) -> String {
    if display == NONE_SENTINEL {
        return "0".to_string();
    }
    match display.parse::<u64>() {
        Ok(value) => value.to_string(),
        Err(_) => "0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::row::{Attachment, Field};

    fn circles() -> Vec<Circle> {
        vec![
            Circle {
                id: 1,
                name: "Kraków Centrum".into(),
                region: "małopolskie".into(),
            },
            Circle {
                id: 2,
                name: "Gdańsk Wrzeszcz".into(),
                region: "pomorskie".into(),
            },
        ]
    }

    fn member() -> Row {
        Row::new(
            7,
            vec![
                Field::new("first_name", "Anna", EditKind::Text),
                Field::new("last_name", "Kowalska", EditKind::Text),
                Field::new("date_of_birth", "1990-01-01", EditKind::Date),
                Field::new("id_document_number", "90010112345", EditKind::Text),
                Field::new("contribution", NONE_SENTINEL, EditKind::Number),
                Field::new("circle", "Kraków Centrum", EditKind::CircleSelect),
                Field::new("region", "stale region", EditKind::Immutable),
            ],
        )
        .with_attachment(Attachment::new(Some("/uploads/90010112345.pdf".into())))
    }

    fn accepted() -> SaveOutcome {
        SaveOutcome {
            fields: Ok(None),
            attachment: None,
        }
    }

    #[test]
    fn editors_follow_field_kinds() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();

        assert_eq!(row.state(), EditState::Editing);
        assert!(matches!(row.fields[0].editor, Some(Editor::Text { select_all: true, .. })));
        assert_eq!(row.fields[2].editor, Some(Editor::Date("1990-01-01".into())));
        assert_eq!(row.fields[4].editor, Some(Editor::Number("0".into())));
        assert_eq!(
            row.fields[5].editor.as_ref().and_then(Editor::selected_circle).map(|c| c.id),
            Some(1)
        );
        assert!(row.fields[6].editor.is_none());
        assert_eq!(row.fields[6].display_value, "małopolskie");
        assert_eq!(row.fields[0].original_value.as_deref(), Some("Anna"));
        assert_eq!(
            row.attachment.as_ref().map(|a| a.state),
            Some(AttachmentState::Edit)
        );
    }

    #[test]
    fn cancel_restores_every_displayed_value() {
        let mut row = member();
        let before = row.cells();
        let attachment_before = row.attachment.clone();

        row.begin_edit(&circles()).unwrap();
        row.input_char(0, 'X').unwrap();
        row.step(4, 5).unwrap();
        row.step(5, 1).unwrap();
        row.choose_attachment(PathBuf::from("/tmp/new.pdf")).unwrap();
        row.cancel_edit().unwrap();

        assert_eq!(row.cells(), before);
        assert_eq!(row.attachment, attachment_before);
        assert!(row.fields.iter().all(|f| f.editor.is_none() && f.original_value.is_none()));
        assert_eq!(row.state(), EditState::Viewing);
    }

    #[test]
    fn unknown_circle_clears_the_region() {
        let mut row = member();
        row.field_mut("circle").unwrap().display_value = "Koło rozwiązane".into();
        row.begin_edit(&circles()).unwrap();
        assert_eq!(row.fields[6].display_value, "");
        assert_eq!(row.fields[5].submitted(), "Koło rozwiązane");

        row.cancel_edit().unwrap();
        assert_eq!(row.fields[6].display_value, "stale region");
    }

    #[test]
    fn cancel_restores_surrounding_spaces() {
        let mut row = member();
        row.fields[0].display_value = "  Anna ".into();
        row.begin_edit(&circles()).unwrap();
        assert_eq!(row.fields[0].shown(), "Anna");
        row.input_char(0, 'X').unwrap();
        row.cancel_edit().unwrap();
        assert_eq!(row.fields[0].display_value, "  Anna ");
    }

    #[test]
    fn padded_key_field_is_not_a_key_change() {
        let mut row = member();
        row.fields[3].display_value = "90010112345 ".into();
        row.begin_edit(&circles()).unwrap();
        let request = row.begin_save(Some("id_document_number")).unwrap();
        assert_eq!(request.fields["id_document_number"], "90010112345");
        assert_eq!(request.new_key, None);
    }

    #[test]
    fn selecting_circle_updates_region_locally() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.select_circle(5, 1).unwrap();
        assert_eq!(row.field(REGION_FIELD).unwrap().display_value, "pomorskie");
        assert_eq!(row.fields[5].shown(), "Gdańsk Wrzeszcz");
    }

    #[test]
    fn text_editor_replaces_on_first_keystroke() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        for ch in "Joanna".chars() {
            row.input_char(0, ch).unwrap();
        }
        assert_eq!(row.fields[0].shown(), "Joanna");
    }

    #[test]
    fn empty_number_commits_sentinel() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.input_backspace(4).unwrap();
        let request = row.begin_save(None).unwrap();
        assert_eq!(request.fields["contribution"], "");
        row.complete_save(&request, &accepted()).unwrap();
        assert_eq!(row.fields[4].display_value, NONE_SENTINEL);
    }

    #[test]
    fn numeric_values_commit_verbatim() {
        for typed in ["0", "7", "120"] {
            let mut row = member();
            row.begin_edit(&circles()).unwrap();
            row.input_backspace(4).unwrap();
            for ch in typed.chars() {
                row.input_char(4, ch).unwrap();
            }
            let request = row.begin_save(None).unwrap();
            row.complete_save(&request, &accepted()).unwrap();
            assert_eq!(row.fields[4].display_value, typed);
        }
    }

    #[test]
    fn number_editor_never_goes_negative() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.step(4, -3).unwrap();
        assert_eq!(row.fields[4].shown(), "0");
        row.input_char(4, 'a').unwrap();
        assert_eq!(row.fields[4].shown(), "0");
    }

    #[test]
    fn save_collects_full_field_map() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.select_circle(5, 1).unwrap();
        let request = row.begin_save(Some("id_document_number")).unwrap();

        assert_eq!(row.state(), EditState::Saving);
        assert_eq!(request.id, 7);
        assert_eq!(request.fields.len(), 7);
        assert_eq!(request.fields["circle"], "Gdańsk Wrzeszcz");
        assert_eq!(request.fields["region"], "pomorskie");
        assert_eq!(request.new_key, None);
        assert_eq!(request.attachment, None);
    }

    #[test]
    fn saving_rejects_further_transitions() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.begin_save(None).unwrap();
        assert_eq!(row.cancel_edit(), Err(EditError::SaveInFlight(7)));
        assert_eq!(row.begin_edit(&circles()), Err(EditError::SaveInFlight(7)));
        assert_eq!(row.begin_save(None), Err(EditError::SaveInFlight(7)));
        assert_eq!(row.input_char(0, 'x'), Err(EditError::SaveInFlight(7)));
    }

    #[test]
    fn rejected_save_keeps_editors_open() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.input_char(0, 'Z').unwrap();
        let request = row.begin_save(None).unwrap();
        let outcome = SaveOutcome {
            fields: Err("Niepoprawny email".into()),
            attachment: None,
        };
        row.complete_save(&request, &outcome).unwrap();

        assert_eq!(row.state(), EditState::Editing);
        assert_eq!(row.fields[0].shown(), "Z");
        assert_eq!(row.fields[0].original_value.as_deref(), Some("Anna"));
        row.cancel_edit().unwrap();
        assert_eq!(row.fields[0].display_value, "Anna");
    }

    #[test]
    fn changed_key_rewrites_declaration_link() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        for ch in "85050554321".chars() {
            row.input_char(3, ch).unwrap();
        }
        let request = row.begin_save(Some("id_document_number")).unwrap();
        assert_eq!(request.new_key.as_deref(), Some("85050554321"));
        row.complete_save(&request, &accepted()).unwrap();

        let attachment = row.attachment.as_ref().unwrap();
        assert_eq!(attachment.link.as_deref(), Some("/uploads/85050554321.pdf"));
        assert_eq!(attachment.state, AttachmentState::View);
    }

    #[test]
    fn uploaded_declaration_refreshes_link() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.choose_attachment(PathBuf::from("/home/a/skan.png")).unwrap();
        let request = row.begin_save(Some("id_document_number")).unwrap();
        assert_eq!(request.attachment, Some(PathBuf::from("/home/a/skan.png")));

        let outcome = SaveOutcome {
            fields: Ok(None),
            attachment: Some(Ok("90010112345.png".into())),
        };
        row.complete_save(&request, &outcome).unwrap();
        let attachment = row.attachment.as_ref().unwrap();
        assert_eq!(attachment.link.as_deref(), Some("/uploads/90010112345.png"));
        assert_eq!(attachment.chosen_file, None);
        assert!(attachment.snapshot.is_none());
    }

    #[test]
    fn created_draft_takes_server_id() {
        let mut row = Row::new(0, vec![Field::new("first_name", "", EditKind::Text)]);
        row.draft = true;
        row.begin_edit(&[]).unwrap();
        let request = row.begin_save(None).unwrap();
        assert!(request.draft);
        let outcome = SaveOutcome {
            fields: Ok(Some(42)),
            attachment: None,
        };
        row.complete_save(&request, &outcome).unwrap();
        assert_eq!(row.id, 42);
        assert!(!row.draft);
    }

    #[test]
    fn date_editor_steps_by_day() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        row.step(2, -1).unwrap();
        assert_eq!(row.fields[2].shown(), "1989-12-31");
    }

    #[test]
    fn immutable_fields_reject_input() {
        let mut row = member();
        row.begin_edit(&circles()).unwrap();
        assert_eq!(
            row.input_char(6, 'x'),
            Err(EditError::NotEditable("region".into()))
        );
    }
}
