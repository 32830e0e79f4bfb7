use std::collections::HashMap;
use std::ops::Range;

use ratatui::{
    Frame,
    layout::{Constraint, Layout, Margin, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span, Text},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
};
use tracing::trace;

use crate::domain::RegConfig;
use crate::model::{Confirm, LoginForm, Model, Modus};
use crate::table::edit::EditState;
use crate::table::freeze::natural_widths;
use crate::table::row::Editor;
use crate::table::{Table as DataTable, TableKind};

pub const CMDLINE_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const TABLE_BORDER_HEIGHT: usize = 2;
pub const COLUMN_WIDTH_MARGIN: usize = 1;
const COLUMN_SPACING: u16 = 1;
const POPUP_WIDTH: u16 = 76;
const LOGIN_WIDTH: u16 = 64;
const LOGIN_LABEL_WIDTH: usize = 18;

/// Scroll position of one table view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Viewport {
    row_offset: usize,
    column_offset: usize,
}

impl Viewport {
    /// Scrolls just enough to keep the curser cell on screen.
    fn follow(&mut self, row: usize, height: usize, column: usize, widths: &[u16], width: u16) {
        if row < self.row_offset {
            self.row_offset = row;
        } else if height > 0 && row >= self.row_offset + height {
            self.row_offset = row + 1 - height;
        }

        if column < self.column_offset {
            self.column_offset = column;
        }
        while self.column_offset < column
            && span_width(&widths[self.column_offset..=column.min(widths.len().saturating_sub(1))])
                > u32::from(width)
        {
            self.column_offset += 1;
        }
    }

    /// Columns that fit into `width`, at least one.
    fn columns(&self, widths: &[u16], width: u16) -> Range<usize> {
        let start = self.column_offset.min(widths.len());
        let mut end = start;
        let mut used = 0u32;
        while end < widths.len() {
            let next = u32::from(widths[end]) + u32::from(COLUMN_SPACING);
            if end > start && used + next > u32::from(width) {
                break;
            }
            used += next;
            end += 1;
        }
        start..end
    }
}

fn span_width(widths: &[u16]) -> u32 {
    widths
        .iter()
        .map(|w| u32::from(*w) + u32::from(COLUMN_SPACING))
        .sum()
}

#[derive(Debug)]
pub struct TableUI {
    max_column_width: usize,
    viewports: HashMap<TableKind, Viewport>,
    measurement: Option<(TableKind, Vec<u16>)>,
}

impl TableUI {
    pub fn new(config: &RegConfig) -> Self {
        Self {
            max_column_width: config.max_column_width,
            viewports: HashMap::new(),
            measurement: None,
        }
    }

    /// Natural widths measured during the last draw of a table waiting for a freeze.
    pub fn take_measurement(&mut self) -> Option<(TableKind, Vec<u16>)> {
        self.measurement.take()
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let area = frame.area();
        let [main, statusline] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(area);

        if model.modus() == Modus::Login {
            draw_login(model.login_form(), model.server(), frame, main);
        } else {
            self.draw_table(model, frame, main);
        }
        draw_statusline(model, frame, statusline);

        match model.modus() {
            Modus::Popup => {
                let (title, message) = model.popup();
                draw_message(frame, area, title, message);
            }
            Modus::Confirm => {
                if let Some(confirm) = model.confirm() {
                    draw_confirm(frame, area, confirm);
                }
            }
            _ => {}
        }
    }

    fn draw_table(&mut self, model: &Model, frame: &mut Frame, area: Rect) {
        let table = model.current_table();
        let edit_focus = model.modus() == Modus::Edit;

        let visible = table.visible_indices();
        let cells: Vec<Vec<String>> = visible
            .iter()
            .map(|idx| row_cells(table, *idx))
            .collect();
        let headers = table.headers();
        let natural = natural_widths(&headers, &cells, COLUMN_WIDTH_MARGIN, self.max_column_width);

        let inner_width = area.width.saturating_sub(2);
        let body_height =
            (area.height as usize).saturating_sub(TABLE_BORDER_HEIGHT + TABLE_HEADER_HEIGHT);
        if table.wants_measurement() {
            let measured = if inner_width == 0 || body_height == 0 {
                vec![0; natural.len()]
            } else {
                natural.clone()
            };
            self.measurement = Some((table.kind, measured));
        }
        let widths = table.freezer.widths(&natural);

        let viewport = self.viewports.entry(table.kind).or_default();
        viewport.follow(
            table.curser_row,
            body_height,
            table.curser_column,
            &widths,
            inner_width,
        );
        let row_offset = viewport.row_offset;
        let columns = viewport.columns(&widths, inner_width);
        trace!("Drawing {} rows {row_offset}.. columns {columns:?}", table.kind.title());

        let header = Row::new(columns.clone().map(|c| {
            let mut style = Style::default().add_modifier(Modifier::BOLD);
            if c == table.curser_column {
                style = style.bg(Color::Blue);
            }
            Cell::from(headers[c].clone()).style(style)
        }))
        .style(Style::default().bg(Color::DarkGray));

        let rows: Vec<Row> = visible
            .iter()
            .enumerate()
            .skip(row_offset)
            .take(body_height)
            .map(|(pos, idx)| {
                let data_row = &table.rows[*idx];
                let state = data_row.state();
                let selected = pos == table.curser_row;
                let row_style = match state {
                    EditState::Saving => Style::default().fg(Color::DarkGray).italic(),
                    EditState::Editing => Style::default().bg(Color::Indexed(236)),
                    EditState::Viewing if data_row.banned => Style::default().fg(Color::Red),
                    EditState::Viewing => Style::default(),
                };
                let row_cells = columns.clone().map(|c| {
                    let style = if state == EditState::Editing && edit_focus {
                        if c == table.focus_field {
                            Style::default().add_modifier(Modifier::REVERSED)
                        } else {
                            Style::default()
                        }
                    } else if selected && c == table.curser_column {
                        Style::default().bg(Color::Yellow).fg(Color::Black)
                    } else if selected {
                        Style::default().bg(Color::Blue).fg(Color::White)
                    } else {
                        Style::default()
                    };
                    Cell::from(cells[pos][c].clone()).style(style)
                });
                Row::new(row_cells).style(row_style)
            })
            .collect();

        let constraints: Vec<Constraint> = widths[columns]
            .iter()
            .map(|w| Constraint::Length(*w))
            .collect();

        let widget = Table::new(rows, constraints)
            .header(header)
            .column_spacing(COLUMN_SPACING)
            .block(table_block(table, model.server()));
        frame.render_widget(widget, area);

        if !table.loaded {
            let inner = area.inner(Margin::new(1, 1));
            frame.render_widget(
                Paragraph::new("Loading ...").fg(Color::DarkGray).centered(),
                inner,
            );
        }
    }
}

/// Cell texts of a row, with circle selectors marked while editing.
fn row_cells(table: &DataTable, idx: usize) -> Vec<String> {
    let row = &table.rows[idx];
    (0..table.columns.len())
        .map(|c| match row.fields.get(c) {
            Some(field) if matches!(field.editor, Some(Editor::CircleSelect { .. })) => {
                format!("◂ {} ▸", field.shown())
            }
            _ => table.cell_text(row, c),
        })
        .collect()
}

fn table_block<'a>(table: &DataTable, server: &str) -> Block<'a> {
    let mut title = format!(" {} ", table.kind.title());
    if table.kind == TableKind::Documents
        && let Some(owner) = table.owner
    {
        title.push_str(&format!("of member {owner} "));
    }
    if table.total_pages > 1 {
        title.push_str(&format!("[{}/{}] ", table.page, table.total_pages));
    }
    if !table.query.is_empty() {
        title.push_str(&format!("/{} ", table.query));
    }
    Block::default()
        .borders(Borders::ALL)
        .title(Line::from(title).bold())
        .title(Line::from(format!(" {server} ")).right_aligned())
}

fn draw_statusline(model: &Model, frame: &mut Frame, area: Rect) {
    if let Some((kind, input)) = model.prompt() {
        let label = kind.label();
        let line = Line::from(vec![
            Span::styled(label.clone(), Style::default().bold()),
            Span::raw(input.input.clone()),
        ]);
        frame.render_widget(Paragraph::new(line), area);
        let x = area.x + (label.chars().count() + input.curser_pos) as u16;
        frame.set_cursor_position(Position::new(
            x.min(area.right().saturating_sub(1)),
            area.y,
        ));
        return;
    }

    if model.modus() == Modus::Login {
        frame.render_widget(Paragraph::new(model.status_message()), area);
        return;
    }

    let table = model.current_table();
    let count = table.visible_count();
    let position = format!(
        " {}/{} ",
        if count == 0 { 0 } else { table.curser_row + 1 },
        count
    );
    let [left, right] = Layout::horizontal([
        Constraint::Min(0),
        Constraint::Length(position.chars().count() as u16),
    ])
    .areas(area);
    frame.render_widget(Paragraph::new(model.status_message()), left);
    frame.render_widget(Paragraph::new(position).fg(Color::DarkGray), right);
}

/// Centered rectangle of a fixed size, clamped to `area`.
pub fn centered_rect_fixed(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x.saturating_add(area.width.saturating_sub(w) / 2),
        y: area.y.saturating_add(area.height.saturating_sub(h) / 2),
        width: w,
        height: h,
    }
}

/// Clears `area` and draws a rounded frame titled `title` around it.
fn draw_popup_frame(frame: &mut Frame, area: Rect, title: impl Into<String>) -> Rect {
    frame.render_widget(Clear, area);
    let block = Block::default()
        .title(format!(" {} ", title.into()))
        .borders(Borders::ALL)
        .border_set(symbols::border::ROUNDED)
        .style(Style::default().fg(Color::White).bg(Color::Black));
    frame.render_widget(block, area);
    area.inner(Margin::new(2, 1))
}

fn draw_message(frame: &mut Frame, area: Rect, title: &str, message: &str) {
    let height = message.lines().count() as u16 + 4;
    let popup = centered_rect_fixed(area, POPUP_WIDTH, height);
    let inner = draw_popup_frame(frame, popup, title);
    let [body, hint] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(inner);
    frame.render_widget(Paragraph::new(message).wrap(Wrap { trim: false }), body);
    frame.render_widget(
        Paragraph::new("Esc / Enter: close").fg(Color::DarkGray).right_aligned(),
        hint,
    );
}

fn draw_confirm(frame: &mut Frame, area: Rect, confirm: &Confirm) {
    let popup = centered_rect_fixed(area, 56, 7);
    let inner = draw_popup_frame(frame, popup, "Confirm");

    let selected = Style::default().fg(Color::Black).bg(Color::White).bold();
    let unselected = Style::default().fg(Color::White).bg(Color::Black);
    let (ok, cancel) = if confirm.yes_selected {
        (selected, unselected)
    } else {
        (unselected, selected)
    };
    let text = Text::from(vec![
        Line::raw(confirm.kind.question()),
        Line::raw(""),
        Line::from(vec![
            Span::styled("[ OK ]", ok),
            Span::raw("   "),
            Span::styled("[ Cancel ]", cancel),
        ])
        .centered(),
    ]);
    frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn draw_login(form: &LoginForm, server: &str, frame: &mut Frame, area: Rect) {
    let height = form.fields.len() as u16 * 2 + 6;
    let popup = centered_rect_fixed(area, LOGIN_WIDTH, height);
    let title = if form.register { "Register" } else { "Log in" };
    let inner = draw_popup_frame(frame, popup, format!("{title} at {server}"));

    let mut lines = Vec::new();
    for (idx, field) in form.fields.iter().enumerate() {
        let label = format!("{:>width$}: ", field.label, width = LOGIN_LABEL_WIDTH - 2);
        let label_style = if idx == form.focus {
            Style::default().fg(Color::Yellow).bold()
        } else {
            Style::default()
        };
        let value = field.input.get().shown(field.input.is_masked());
        lines.push(Line::from(vec![
            Span::styled(label, label_style),
            Span::raw(value),
        ]));
        lines.push(Line::raw(""));
    }
    match (&form.error, form.pending) {
        (_, true) => lines.push(Line::raw("Waiting for the server ...").fg(Color::DarkGray)),
        (Some(error), false) => lines.push(Line::raw(error.clone()).fg(Color::Red)),
        (None, false) => lines.push(Line::raw("")),
    }
    lines.push(Line::raw(""));
    lines.push(
        Line::raw("Enter: next / submit  Ctrl-R: log in / register  Esc: quit")
            .fg(Color::DarkGray),
    );
    frame.render_widget(Paragraph::new(Text::from(lines)), inner);

    if let Some(field) = form.fields.get(form.focus) {
        let x = inner.x + (LOGIN_LABEL_WIDTH + field.input.get().curser_pos) as u16;
        let y = inner.y + form.focus as u16 * 2;
        if x < inner.right() && y < inner.bottom() {
            frame.set_cursor_position(Position::new(x, y));
        }
    }
}
