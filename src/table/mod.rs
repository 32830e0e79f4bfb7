pub mod collate;
pub mod edit;
pub mod freeze;
pub mod row;
pub mod search;
pub mod sort;

use tracing::{debug, trace};

use crate::api::{Document, Member};
use edit::{EditError, EditState, SaveOutcome, SaveRequest};
use freeze::ColumnFreezer;
use row::{Attachment, Circle, EditKind, Field, NONE_SENTINEL, Row, RowId};
use search::MatchMode;
use sort::{ColumnType, SortState, TextOrder};

/// Field whose change renames the declaration scan.
pub const KEY_FIELD: &str = "id_document_number";

/// Id of a member row that was not created on the server yet.
pub const DRAFT_ID: RowId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Members,
    Circles,
    Banned,
    Deleted,
    Documents,
}

impl TableKind {
    /// Views cycled with `Tab`. Documents are opened from a member.
    pub const CYCLE: [TableKind; 4] = [
        TableKind::Members,
        TableKind::Circles,
        TableKind::Banned,
        TableKind::Deleted,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            TableKind::Members => "Members",
            TableKind::Circles => "Circles",
            TableKind::Banned => "Banned",
            TableKind::Deleted => "Deleted",
            TableKind::Documents => "Documents",
        }
    }

    pub fn behavior(&self) -> TableBehavior {
        match self {
            TableKind::Members => TableBehavior {
                match_mode: MatchMode::Substring,
                text_order: TextOrder::Numeric,
                key_field: Some(KEY_FIELD),
                actions: &[
                    RowAction::Edit,
                    RowAction::Delete,
                    RowAction::Ban,
                    RowAction::Unban,
                    RowAction::Open,
                ],
            },
            TableKind::Circles => TableBehavior {
                match_mode: MatchMode::WordPrefix,
                text_order: TextOrder::Locale,
                key_field: None,
                actions: &[RowAction::Delete],
            },
            TableKind::Banned => TableBehavior {
                match_mode: MatchMode::WordPrefix,
                text_order: TextOrder::Locale,
                key_field: None,
                actions: &[RowAction::Unban, RowAction::Purge],
            },
            TableKind::Deleted => TableBehavior {
                match_mode: MatchMode::WordPrefix,
                text_order: TextOrder::Locale,
                key_field: None,
                actions: &[RowAction::Purge],
            },
            TableKind::Documents => TableBehavior {
                match_mode: MatchMode::WordPrefix,
                text_order: TextOrder::Locale,
                key_field: None,
                actions: &[RowAction::Open, RowAction::Delete],
            },
        }
    }

    pub fn columns(&self) -> Vec<ColumnSpec> {
        let mut columns = match self {
            TableKind::Members => member_columns(true),
            TableKind::Banned | TableKind::Deleted => member_columns(false),
            TableKind::Circles => vec![
                ColumnSpec::data("name", "Name", EditKind::Immutable),
                ColumnSpec::data("region", "Region", EditKind::Immutable),
            ],
            TableKind::Documents => vec![
                ColumnSpec::data("document_type", "Type", EditKind::Immutable),
                ColumnSpec::data("filename", "File", EditKind::Immutable),
                ColumnSpec::data("upload_date", "Uploaded", EditKind::Immutable)
                    .sorted_as(ColumnType::Date),
                ColumnSpec::data("file_size", "Size [B]", EditKind::Immutable)
                    .sorted_as(ColumnType::Number),
            ],
        };
        if *self == TableKind::Members {
            columns.push(ColumnSpec {
                name: "declaration",
                title: "Declaration",
                edit_kind: EditKind::Immutable,
                value_type: None,
                role: ColumnRole::Attachment,
            });
        }
        columns.push(ColumnSpec {
            name: "actions",
            title: "Actions",
            edit_kind: EditKind::Immutable,
            value_type: None,
            role: ColumnRole::Actions,
        });
        columns
    }
}

const MEMBER_FIELDS: [(&str, &str, EditKind); 13] = [
    ("first_name", "First name", EditKind::Text),
    ("last_name", "Last name", EditKind::Text),
    ("date_of_birth", "Born", EditKind::Date),
    ("place_of_birth", "Birthplace", EditKind::Text),
    ("join_date_to_organization", "Joined", EditKind::Date),
    ("join_date_to_circle", "Joined circle", EditKind::Date),
    ("id_document_number", "PESEL", EditKind::Text),
    ("phone_number", "Phone", EditKind::Text),
    ("email", "Email", EditKind::Text),
    ("contribution", "Contribution", EditKind::Number),
    ("circle", "Circle", EditKind::CircleSelect),
    ("region", "Region", EditKind::Immutable),
    ("additional_fields", "Notes", EditKind::Text),
];

fn member_columns(editable: bool) -> Vec<ColumnSpec> {
    MEMBER_FIELDS
        .iter()
        .map(|(name, title, kind)| {
            let spec = ColumnSpec::data(name, title, *kind);
            if editable {
                spec
            } else {
                ColumnSpec {
                    edit_kind: EditKind::Immutable,
                    ..spec
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Data,
    Attachment,
    Actions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub edit_kind: EditKind,
    /// Sort type fixed by the column, `None` lets the sorter infer one.
    pub value_type: Option<ColumnType>,
    pub role: ColumnRole,
}

impl ColumnSpec {
    fn data(name: &'static str, title: &'static str, edit_kind: EditKind) -> Self {
        let value_type = match edit_kind {
            EditKind::Date => Some(ColumnType::Date),
            EditKind::Number => Some(ColumnType::Number),
            _ => None,
        };
        Self {
            name,
            title,
            edit_kind,
            value_type,
            role: ColumnRole::Data,
        }
    }

    fn sorted_as(self, value_type: ColumnType) -> Self {
        Self {
            value_type: Some(value_type),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Edit,
    Delete,
    Ban,
    Unban,
    Purge,
    /// Documents of a member, or the file of a document.
    Open,
}

impl RowAction {
    fn label(&self, kind: TableKind) -> &'static str {
        match (self, kind) {
            (RowAction::Edit, _) => "e:edit",
            (RowAction::Delete, _) => "d:del",
            (RowAction::Ban, _) => "b:ban",
            (RowAction::Unban, _) => "u:unban",
            (RowAction::Purge, _) => "x:purge",
            (RowAction::Open, TableKind::Documents) => "⏎:get",
            (RowAction::Open, _) => "⏎:docs",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableBehavior {
    pub match_mode: MatchMode,
    pub text_order: TextOrder,
    pub key_field: Option<&'static str>,
    pub actions: &'static [RowAction],
}

impl Row {
    pub fn from_member(member: &Member, editable: bool) -> Self {
        let fields = MEMBER_FIELDS
            .iter()
            .map(|(name, _, kind)| {
                let kind = if editable { *kind } else { EditKind::Immutable };
                Field::new(*name, member.value(name), kind)
            })
            .collect();
        let mut row = Row::new(member.id, fields);
        row.banned = member.status.as_deref() == Some("banned");
        if editable {
            row = row.with_attachment(Attachment::from_scan_path(
                member.membership_form_scan.as_deref(),
            ));
        }
        row
    }

    /// Blank member row that is created on the server when saved.
    pub fn draft_member() -> Self {
        let fields = MEMBER_FIELDS
            .iter()
            .map(|(name, _, kind)| Field::new(*name, "", *kind))
            .collect();
        let mut row = Row::new(DRAFT_ID, fields).with_attachment(Attachment::default());
        row.draft = true;
        row
    }
}

impl From<&Circle> for Row {
    fn from(circle: &Circle) -> Self {
        Row::new(
            circle.id,
            vec![
                Field::new("name", circle.name.as_str(), EditKind::Immutable),
                Field::new("region", circle.region.as_str(), EditKind::Immutable),
            ],
        )
    }
}

impl From<&Document> for Row {
    fn from(doc: &Document) -> Self {
        let uploaded = doc.upload_date.split('T').next().unwrap_or_default();
        Row::new(
            doc.id,
            vec![
                Field::new("document_type", doc.document_type.as_str(), EditKind::Immutable),
                Field::new("filename", doc.filename.as_str(), EditKind::Immutable),
                Field::new("upload_date", uploaded, EditKind::Immutable),
                Field::new("file_size", doc.file_size.to_string(), EditKind::Immutable),
            ],
        )
    }
}

/// One table view: its rows plus search, sort, freeze and edit state.
#[derive(Debug, Clone)]
pub struct Table {
    pub kind: TableKind,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Row>,
    pub sort: SortState,
    pub query: String,
    pub freezer: ColumnFreezer,
    pub editing: Option<RowId>,
    /// Index among visible rows.
    pub curser_row: usize,
    pub curser_column: usize,
    /// Field focused by the editor of the editing row.
    pub focus_field: usize,
    pub page: usize,
    pub total_pages: usize,
    /// Member the documents belong to.
    pub owner: Option<RowId>,
    pub loaded: bool,
}

impl Table {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            columns: kind.columns(),
            rows: Vec::new(),
            sort: SortState::default(),
            query: String::new(),
            freezer: ColumnFreezer::default(),
            editing: None,
            curser_row: 0,
            curser_column: 0,
            focus_field: 0,
            page: 1,
            total_pages: 1,
            owner: None,
            loaded: false,
        }
    }

    pub fn behavior(&self) -> TableBehavior {
        self.kind.behavior()
    }

    /// Replaces every row with fresh server data, keeping query and sort.
    pub fn fill(&mut self, rows: Vec<Row>) {
        self.rows = rows;
        self.editing = None;
        self.loaded = true;
        if let Some(column) = self.sort.column {
            sort::sort_rows(
                &mut self.rows,
                column,
                self.columns.get(column).and_then(|c| c.value_type),
                self.sort.direction,
                self.kind.behavior().text_order,
            );
        }
        search::apply(&mut self.rows, &self.query, self.kind.behavior().match_mode);
        self.clamp_curser();
        self.freezer.request();
        debug!("{} table filled with {} rows", self.kind.title(), self.rows.len());
    }

    /// Widths are measured once rows have arrived and some of them show.
    pub fn wants_measurement(&self) -> bool {
        self.loaded && self.freezer.is_pending() && self.rows.iter().any(|r| r.visible)
    }

    pub fn visible_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.visible)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn visible_count(&self) -> usize {
        self.rows.iter().filter(|r| r.visible).count()
    }

    fn selected_index(&self) -> Option<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.visible)
            .nth(self.curser_row)
            .map(|(idx, _)| idx)
    }

    pub fn selected(&self) -> Option<&Row> {
        self.selected_index().map(|idx| &self.rows[idx])
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    pub fn editing_row(&self) -> Option<&Row> {
        self.editing.and_then(|id| self.row(id))
    }

    pub fn editing_row_mut(&mut self) -> Option<&mut Row> {
        match self.editing {
            Some(id) => self.row_mut(id),
            None => None,
        }
    }

    pub fn is_saving(&self) -> bool {
        self.editing_row()
            .is_some_and(|r| r.state() == EditState::Saving)
    }

    /// Points the curser at the visible row with `id`.
    pub fn select_row(&mut self, id: RowId) {
        if let Some(pos) = self
            .rows
            .iter()
            .filter(|r| r.visible)
            .position(|r| r.id == id)
        {
            self.curser_row = pos;
        }
    }

    pub fn clamp_curser(&mut self) {
        let visible = self.visible_count();
        self.curser_row = self.curser_row.min(visible.saturating_sub(1));
        self.curser_column = self.curser_column.min(self.columns.len().saturating_sub(1));
    }

    pub fn move_rows(&mut self, delta: isize) {
        let last = self.visible_count().saturating_sub(1);
        self.curser_row = self.curser_row.saturating_add_signed(delta).min(last);
    }

    pub fn move_columns(&mut self, delta: isize) {
        let last = self.columns.len().saturating_sub(1);
        self.curser_column = self.curser_column.saturating_add_signed(delta).min(last);
    }

    /// Live search. Only visibility changes.
    pub fn search(&mut self, query: &str) -> usize {
        let selected = self.selected().map(|r| r.id);
        self.query = query.to_string();
        let visible = search::apply(&mut self.rows, query, self.kind.behavior().match_mode);
        self.curser_row = 0;
        if let Some(id) = selected {
            self.select_row(id);
        }
        self.clamp_curser();
        visible
    }

    /// Sorts by the column under the curser. Non data columns are left alone.
    pub fn sort_by(&mut self, column: usize) -> Option<ColumnType> {
        if self.columns.get(column).map(|c| c.role) != Some(ColumnRole::Data) {
            trace!("Column {column} is not sortable");
            return None;
        }
        let selected = self.selected().map(|r| r.id);
        let direction = self.sort.activate(column);
        let declared = self.columns.get(column).and_then(|c| c.value_type);
        let column_type = sort::sort_rows(
            &mut self.rows,
            column,
            declared,
            direction,
            self.kind.behavior().text_order,
        );
        if let Some(id) = selected {
            self.select_row(id);
        }
        Some(column_type)
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, c)| format!("{}{}", c.title, self.sort.indicator(idx)))
            .collect()
    }

    /// Text of a cell, including the attachment and action columns.
    pub fn cell_text(&self, row: &Row, column: usize) -> String {
        match self.columns.get(column).map(|c| c.role) {
            Some(ColumnRole::Data) => row.cell(column),
            Some(ColumnRole::Attachment) => row
                .attachment
                .as_ref()
                .map(Attachment::label)
                .unwrap_or_default(),
            Some(ColumnRole::Actions) => self.action_labels(row),
            None => String::new(),
        }
    }

    fn action_labels(&self, row: &Row) -> String {
        match row.state() {
            EditState::Editing => "^s:save esc:cancel".to_string(),
            EditState::Saving => "saving…".to_string(),
            EditState::Viewing => self
                .available_actions(row)
                .iter()
                .map(|a| a.label(self.kind))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Actions offered for a row right now. Ban and unban follow the ban flag.
    pub fn available_actions(&self, row: &Row) -> Vec<RowAction> {
        self.behavior()
            .actions
            .iter()
            .copied()
            .filter(|a| match (self.kind, a) {
                (TableKind::Members, RowAction::Ban) => !row.banned,
                (TableKind::Members, RowAction::Unban) => row.banned,
                _ => true,
            })
            .collect()
    }

    pub fn supports(&self, action: RowAction) -> bool {
        self.behavior().actions.contains(&action)
    }

    /// Starts editing the selected row. A row still in `Editing` elsewhere is
    /// cancelled first, a row in `Saving` blocks.
    pub fn begin_edit(&mut self, circles: &[Circle]) -> Result<RowId, EditError> {
        let id = self.selected().map(|r| r.id).ok_or(EditError::UnknownRow(0))?;
        self.begin_edit_of(id, circles)
    }

    fn begin_edit_of(&mut self, id: RowId, circles: &[Circle]) -> Result<RowId, EditError> {
        if let Some(current) = self.editing {
            if current == id {
                return Err(EditError::NotViewing(id));
            }
            if self.is_saving() {
                return Err(EditError::SaveInFlight(current));
            }
            self.cancel_edit()?;
        }
        let row = self.row_mut(id).ok_or(EditError::UnknownRow(id))?;
        row.begin_edit(circles)?;
        let focus = row.fields.iter().position(Field::is_editable).unwrap_or(0);
        self.focus_field = focus;
        self.curser_column = focus;
        self.editing = Some(id);
        self.select_row(id);
        Ok(id)
    }

    /// Puts a blank draft row on top and opens it for editing.
    pub fn insert_draft(&mut self, circles: &[Circle]) -> Result<RowId, EditError> {
        if self.row(DRAFT_ID).is_some() {
            return Err(EditError::NotViewing(DRAFT_ID));
        }
        if self.is_saving() {
            return Err(EditError::SaveInFlight(self.editing.unwrap_or(DRAFT_ID)));
        }
        if self.editing.is_some() {
            self.cancel_edit()?;
        }
        self.rows.insert(0, Row::draft_member());
        self.begin_edit_of(DRAFT_ID, circles)
    }

    pub fn cancel_edit(&mut self) -> Result<RowId, EditError> {
        let id = self.editing.ok_or(EditError::NotEditing(0))?;
        let row = self.row_mut(id).ok_or(EditError::UnknownRow(id))?;
        row.cancel_edit()?;
        let draft = row.draft;
        self.editing = None;
        if draft {
            self.remove_row(id);
        }
        Ok(id)
    }

    pub fn begin_save(&mut self) -> Result<SaveRequest, EditError> {
        let key_field = self.behavior().key_field;
        let id = self.editing.ok_or(EditError::NotEditing(0))?;
        self.row_mut(id)
            .ok_or(EditError::UnknownRow(id))?
            .begin_save(key_field)
    }

    pub fn complete_save(
        &mut self,
        request: &SaveRequest,
        outcome: &SaveOutcome,
    ) -> Result<EditState, EditError> {
        let row = self
            .row_mut(request.id)
            .ok_or(EditError::UnknownRow(request.id))?;
        row.complete_save(request, outcome)?;
        let state = row.state();
        let id = row.id;
        if state == EditState::Viewing {
            self.editing = None;
            self.freezer.request();
        } else {
            self.editing = Some(id);
        }
        Ok(state)
    }

    pub fn remove_row(&mut self, id: RowId) -> Option<Row> {
        let idx = self.rows.iter().position(|r| r.id == id)?;
        if self.editing == Some(id) {
            self.editing = None;
        }
        let row = self.rows.remove(idx);
        self.clamp_curser();
        Some(row)
    }

    /// Moves the editor focus to the next editable field.
    pub fn focus_step(&mut self, forward: bool) {
        let Some(row) = self.editing_row() else {
            return;
        };
        let editable: Vec<usize> = row
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_editable())
            .map(|(idx, _)| idx)
            .collect();
        if editable.is_empty() {
            return;
        }
        let pos = editable
            .iter()
            .position(|idx| *idx == self.focus_field)
            .unwrap_or(0);
        let next = if forward {
            (pos + 1) % editable.len()
        } else {
            (pos + editable.len() - 1) % editable.len()
        };
        self.focus_field = editable[next];
        self.curser_column = self.focus_field;
    }

    /// CSV line of the selected row's data cells.
    pub fn selected_as_csv(&self) -> Option<String> {
        let row = self.selected()?;
        Some(
            row.cells()
                .iter()
                .map(|c| wrap_cell_content(c))
                .collect::<Vec<String>>()
                .join(","),
        )
    }
}

fn wrap_cell_content(c: &str) -> String {
    let mut out = c.replace('"', "\"\"");
    if c.chars().any(|ch| matches!(ch, ' ' | '\t' | ',' | '"')) {
        out = format!("\"{out}\"");
    }
    out
}

impl Member {
    /// Display value of a member field by name.
    pub fn value(&self, name: &str) -> String {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        match name {
            "first_name" => self.first_name.clone(),
            "last_name" => self.last_name.clone(),
            "date_of_birth" => text(&self.date_of_birth),
            "place_of_birth" => text(&self.place_of_birth),
            "join_date_to_organization" => text(&self.join_date_to_organization),
            "join_date_to_circle" => text(&self.join_date_to_circle),
            "id_document_number" => self.id_document_number.clone(),
            "phone_number" => self.phone_number.clone(),
            "email" => self.email.clone(),
            "contribution" => self
                .contribution
                .map(|c| c.to_string())
                .unwrap_or_else(|| NONE_SENTINEL.to_string()),
            "circle" => self.circle.clone(),
            "region" => self.region.clone(),
            "additional_fields" => text(&self.additional_fields),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::sort::SortDirection;

    fn member(id: u64, first: &str, last: &str, born: &str) -> Member {
        Member {
            id,
            first_name: first.into(),
            last_name: last.into(),
            date_of_birth: Some(born.into()),
            id_document_number: format!("9001011234{id}"),
            circle: "Kraków Centrum".into(),
            region: "małopolskie".into(),
            membership_form_scan: Some(format!("uploads/9001011234{id}.pdf")),
            ..Default::default()
        }
    }

    fn members() -> Table {
        let mut table = Table::new(TableKind::Members);
        table.fill(vec![
            Row::from_member(&member(1, "Anna", "Kowalska", "1990-01-01"), true),
            Row::from_member(&member(2, "Jan", "Kowalczyk", "1985-05-05"), true),
            Row::from_member(&member(3, "Zofia", "Nowak", "2000-12-24"), true),
        ]);
        table
    }

    fn circles() -> Vec<Circle> {
        vec![Circle {
            id: 1,
            name: "Kraków Centrum".into(),
            region: "małopolskie".into(),
        }]
    }

    fn ids(table: &Table) -> Vec<u64> {
        table.rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn member_rows_follow_columns() {
        let table = members();
        let row = &table.rows[0];
        assert_eq!(table.columns.len(), MEMBER_FIELDS.len() + 2);
        assert_eq!(row.cell(9), NONE_SENTINEL);
        assert_eq!(
            table.cell_text(row, MEMBER_FIELDS.len()),
            "90010112341.pdf"
        );
        assert_eq!(
            table.cell_text(row, MEMBER_FIELDS.len() + 1),
            "e:edit d:del b:ban ⏎:docs"
        );
    }

    #[test]
    fn members_search_by_substring() {
        let mut table = members();
        assert_eq!(table.search("an kowal"), 2);
        assert!(!table.rows[2].visible);
        assert_eq!(table.search(""), 3);
    }

    #[test]
    fn sorting_actions_column_is_a_no_op() {
        let mut table = members();
        let before = ids(&table);
        assert_eq!(table.sort_by(table.columns.len() - 1), None);
        assert_eq!(table.sort_by(MEMBER_FIELDS.len()), None);
        assert_eq!(ids(&table), before);
        assert_eq!(table.sort.column, None);
    }

    #[test]
    fn sort_toggles_and_keeps_selection() {
        let mut table = members();
        table.curser_row = 2;
        assert_eq!(table.sort_by(2), Some(ColumnType::Date));
        assert_eq!(ids(&table), vec![2, 1, 3]);
        assert_eq!(table.selected().map(|r| r.id), Some(3));

        table.sort_by(2);
        assert_eq!(table.sort.direction, SortDirection::Descending);
        assert_eq!(ids(&table), vec![3, 1, 2]);
        assert!(table.headers()[2].ends_with('▼'));
    }

    #[test]
    fn archive_date_columns_sort_as_dates() {
        let mut table = Table::new(TableKind::Banned);
        table.fill(vec![
            Row::from_member(&member(1, "Anna", "Kowalska", "invalid"), false),
            Row::from_member(&member(2, "Jan", "Kowalczyk", "2023-05-01"), false),
            Row::from_member(&member(3, "Zofia", "Nowak", "2023-01-10"), false),
        ]);
        assert_eq!(table.sort_by(2), Some(ColumnType::Date));
        assert_eq!(ids(&table), vec![1, 3, 2]);
        assert_eq!(table.sort_by(2), Some(ColumnType::Date));
        assert_eq!(ids(&table), vec![2, 3, 1]);
    }

    #[test]
    fn editing_a_second_row_cancels_the_first() {
        let mut table = members();
        table.begin_edit(&circles()).unwrap();
        table
            .editing_row_mut()
            .unwrap()
            .input_char(0, 'X')
            .unwrap();

        table.curser_row = 1;
        assert_eq!(table.begin_edit(&circles()), Ok(2));
        assert_eq!(table.rows[0].state(), EditState::Viewing);
        assert_eq!(table.rows[0].cell(0), "Anna");
        assert_eq!(table.editing, Some(2));
    }

    #[test]
    fn saving_row_blocks_other_edits() {
        let mut table = members();
        table.begin_edit(&circles()).unwrap();
        table.begin_save().unwrap();
        table.curser_row = 1;
        assert_eq!(table.begin_edit(&circles()), Err(EditError::SaveInFlight(1)));
        assert!(table.is_saving());
    }

    #[test]
    fn editing_row_survives_sort_and_filter() {
        let mut table = members();
        table.curser_row = 2;
        table.begin_edit(&circles()).unwrap();
        table.sort_by(0);
        table.search("zofia");
        table.search("");
        let row = table.editing_row().unwrap();
        assert_eq!(row.id, 3);
        assert_eq!(row.state(), EditState::Editing);
        assert!(row.fields[0].editor.is_some());
    }

    #[test]
    fn draft_is_removed_on_cancel() {
        let mut table = members();
        assert_eq!(table.insert_draft(&circles()), Ok(DRAFT_ID));
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.selected().map(|r| r.id), Some(DRAFT_ID));
        table.cancel_edit().unwrap();
        assert_eq!(ids(&table), vec![1, 2, 3]);
        assert_eq!(table.editing, None);
    }

    #[test]
    fn completed_save_releases_the_table() {
        let mut table = members();
        table.begin_edit(&circles()).unwrap();
        let request = table.begin_save().unwrap();
        let outcome = SaveOutcome {
            fields: Ok(None),
            attachment: None,
        };
        assert_eq!(table.complete_save(&request, &outcome), Ok(EditState::Viewing));
        assert_eq!(table.editing, None);
    }

    #[test]
    fn banned_members_offer_unban() {
        let mut banned = member(4, "Ewa", "Lis", "1970-01-01");
        banned.status = Some("banned".into());
        let table = members();
        let row = Row::from_member(&banned, true);
        assert_eq!(
            table.available_actions(&row),
            vec![RowAction::Edit, RowAction::Delete, RowAction::Unban, RowAction::Open]
        );
    }

    #[test]
    fn archive_rows_are_read_only() {
        let mut table = Table::new(TableKind::Deleted);
        table.fill(vec![Row::from_member(&member(5, "Ola", "Lis", "1999-09-09"), false)]);
        assert!(table.rows[0].attachment.is_none());
        assert!(table.rows[0].fields.iter().all(|f| !f.is_editable()));
        assert!(table.supports(RowAction::Purge));
        assert!(!table.supports(RowAction::Edit));
    }

    #[test]
    fn selected_row_copies_as_csv() {
        let mut table = Table::new(TableKind::Circles);
        table.fill(vec![Row::from(&Circle {
            id: 9,
            name: "Koło, Wrocław".into(),
            region: "dolnośląskie".into(),
        })]);
        assert_eq!(
            table.selected_as_csv().as_deref(),
            Some("\"Koło, Wrocław\",dolnośląskie")
        );
    }
}
