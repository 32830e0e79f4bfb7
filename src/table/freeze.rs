use tracing::debug;

/// Pins column widths once they were measured on a visible table.
#[derive(Debug, Clone)]
pub struct ColumnFreezer {
    frozen: Option<Vec<u16>>,
    pending: bool,
}

impl Default for ColumnFreezer {
    fn default() -> Self {
        Self {
            frozen: None,
            pending: true,
        }
    }
}

impl ColumnFreezer {
    /// Asks for a freeze on the next draw, unless widths are already pinned.
    pub fn request(&mut self) {
        if self.frozen.is_none() {
            self.pending = true;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Stores the measured widths. A hidden table measures zero everywhere,
    /// such a measurement is ignored and the freeze stays pending.
    pub fn freeze(&mut self, measured: &[u16]) -> bool {
        if !self.pending || measured.iter().all(|w| *w == 0) {
            return false;
        }
        debug!("Freezing column widths {measured:?}");
        self.frozen = Some(measured.to_vec());
        self.pending = false;
        true
    }

    pub fn unfreeze(&mut self) {
        self.frozen = None;
        self.pending = true;
    }

    /// Widths to lay the table out with.
    pub fn widths(&self, natural: &[u16]) -> Vec<u16> {
        match &self.frozen {
            Some(frozen) if frozen.len() == natural.len() => frozen.clone(),
            _ => natural.to_vec(),
        }
    }
}

/// Content width of every column: the widest of header and cells plus margin,
/// capped at `max_width`.
pub fn natural_widths<S: AsRef<str>>(
    headers: &[S],
    rows: &[Vec<String>],
    margin: usize,
    max_width: usize,
) -> Vec<u16> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let widest = rows
                .iter()
                .filter_map(|r| r.get(idx))
                .map(|c| c.chars().count())
                .chain(std::iter::once(header.as_ref().chars().count()))
                .max()
                .unwrap_or(0);
            (widest + margin).min(max_width) as u16
        })
        .collect()
}
