use std::collections::HashMap;

/// How a column participates in numeric expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Continuous value, expanded by the polynomial transform
    Numeric,
    /// 0/1 indicator, passed through unexpanded
    Indicator,
}

/// One named value produced for an outfit
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCell {
    pub name: String,
    pub kind: ColumnKind,
    pub value: f64,
}

impl FeatureCell {
    pub fn numeric(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Numeric,
            value,
        }
    }

    pub fn indicator(name: impl Into<String>, on: bool) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Indicator,
            value: if on { 1.0 } else { 0.0 },
        }
    }
}

/// Column counts changed by [`FeatureFrame::align`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    pub added: usize,
    pub removed: usize,
}

impl AlignmentReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Dense row-major table of named feature columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    columns: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn new(columns: Vec<String>, kinds: Vec<ColumnKind>, rows: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(columns.len(), kinds.len());
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        Self {
            columns,
            kinds,
            rows,
        }
    }

    /// Builds a frame from per-row cells.
    ///
    /// Columns are the union of all names in order of first appearance. A
    /// cell a row did not produce is filled with 0, as is any NaN.
    pub fn from_records(records: Vec<Vec<FeatureCell>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut kinds: Vec<ColumnKind> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in &records {
            for cell in record {
                if !index.contains_key(&cell.name) {
                    index.insert(cell.name.clone(), columns.len());
                    columns.push(cell.name.clone());
                    kinds.push(cell.kind);
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![0.0; columns.len()];
                for cell in record {
                    if let Some(&i) = index.get(&cell.name) {
                        row[i] = if cell.value.is_nan() { 0.0 } else { cell.value };
                    }
                }
                row
            })
            .collect();

        Self {
            columns,
            kinds,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    fn columns_of(&self, kind: ColumnKind) -> Vec<String> {
        self.columns
            .iter()
            .zip(&self.kinds)
            .filter(|(_, k)| **k == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns_of(ColumnKind::Numeric)
    }

    pub fn indicator_columns(&self) -> Vec<String> {
        self.columns_of(ColumnKind::Indicator)
    }

    /// Projects every row onto `names`; names the frame lacks read as 0
    pub fn select(&self, names: &[String]) -> Vec<Vec<f64>> {
        let index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        self.rows
            .iter()
            .map(|row| {
                names
                    .iter()
                    .map(|name| index.get(name.as_str()).map_or(0.0, |&i| row[i]))
                    .collect()
            })
            .collect()
    }

    /// Reconciles this frame against a recorded column list.
    ///
    /// Columns in `expected` but not in the frame are added as zeros, columns
    /// not in `expected` are dropped, and the result is ordered exactly as
    /// `expected`. Padded columns are marked [`ColumnKind::Indicator`].
    pub fn align(&mut self, expected: &[String]) -> AlignmentReport {
        let current: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let added = expected
            .iter()
            .filter(|name| !current.contains_key(name.as_str()))
            .count();
        let kept = expected.len() - added;
        let report = AlignmentReport {
            added,
            removed: self.columns.len() - kept,
        };

        if report.is_noop() && self.columns.as_slice() == expected {
            return report;
        }

        let kinds = expected
            .iter()
            .map(|name| {
                current
                    .get(name.as_str())
                    .map_or(ColumnKind::Indicator, |&i| self.kinds[i])
            })
            .collect();
        let rows = self.select(expected);

        self.columns = expected.to_vec();
        self.kinds = kinds;
        self.rows = rows;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn frame() -> FeatureFrame {
        FeatureFrame::from_records(vec![
            vec![
                FeatureCell::numeric("harmony", 12.5),
                FeatureCell::indicator("shirt_style_casual", true),
            ],
            vec![
                FeatureCell::numeric("harmony", f64::NAN),
                FeatureCell::indicator("shirt_style_formal", true),
            ],
        ])
    }

    #[test]
    fn test_from_records_unions_columns_and_fills_zero() {
        let frame = frame();
        assert_eq!(
            frame.columns(),
            names(&["harmony", "shirt_style_casual", "shirt_style_formal"]).as_slice()
        );
        assert_eq!(frame.rows()[0], vec![12.5, 1.0, 0.0]);
        assert_eq!(frame.rows()[1], vec![0.0, 0.0, 1.0]);
        assert_eq!(frame.numeric_columns(), names(&["harmony"]));
        assert_eq!(frame.indicator_columns().len(), 2);
    }

    #[test]
    fn test_align_is_noop_when_columns_match() {
        let mut frame = frame();
        let before = frame.clone();
        let expected = frame.columns().to_vec();

        let report = frame.align(&expected);
        assert!(report.is_noop());
        assert_eq!(frame, before);
    }

    #[test]
    fn test_align_pads_drops_and_reorders() {
        let mut frame = frame();
        let expected = names(&["shirt_style_casual", "pants_fit_slim", "harmony", "shoes_style_nan"]);

        let report = frame.align(&expected);
        assert_eq!(report, AlignmentReport { added: 2, removed: 1 });
        assert_eq!(frame.columns(), expected.as_slice());
        assert_eq!(frame.width(), expected.len());
        assert_eq!(frame.rows()[0], vec![1.0, 0.0, 12.5, 0.0]);
        assert_eq!(frame.rows()[1], vec![0.0, 0.0, 0.0, 0.0]);
        assert!(!frame.columns().contains(&"shirt_style_formal".to_string()));
    }

    #[test]
    fn test_align_reorders_same_column_set() {
        let mut frame = frame();
        let expected = names(&["shirt_style_formal", "harmony", "shirt_style_casual"]);

        let report = frame.align(&expected);
        assert!(report.is_noop());
        assert_eq!(frame.columns(), expected.as_slice());
        assert_eq!(frame.rows()[0], vec![0.0, 12.5, 1.0]);
    }

    #[test]
    fn test_select_reads_missing_as_zero() {
        let frame = frame();
        let projected = frame.select(&names(&["missing", "harmony"]));
        assert_eq!(projected, vec![vec![0.0, 12.5], vec![0.0, 0.0]]);
    }
}
