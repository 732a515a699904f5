use super::FactorError;
use crate::recover::{Catalogue, CleanAssessment};
use ndarray::{Array1, Array2, ArrayView1};

/// Binary responses of every pupil to the factor items. Missing responses are
/// stored as NaN.
#[derive(Debug, Clone)]
pub struct ItemMatrix {
    pub items: Vec<String>,
    pub pupils: Vec<String>,
    pub values: Array2<f64>,
}

pub fn is_observed(value: f64) -> bool {
    !value.is_nan()
}

impl ItemMatrix {
    pub fn new(items: Vec<String>, pupils: Vec<String>, values: Array2<f64>) -> Self {
        Self { items, pupils, values }
    }

    /// Selects the factor items from cleaned assessments, in `items` order.
    pub fn from_assessments(
        records: &[CleanAssessment],
        catalogue: &Catalogue,
        items: &[String],
    ) -> Result<Self, FactorError> {
        let positions = items
            .iter()
            .map(|item| {
                catalogue
                    .item_position(item)
                    .ok_or_else(|| FactorError::UnknownItem(item.clone()))
            })
            .collect::<Result<Vec<usize>, FactorError>>()?;

        let mut values = Array2::from_elem((records.len(), items.len()), f64::NAN);
        for (row, record) in records.iter().enumerate() {
            for (col, &pos) in positions.iter().enumerate() {
                if let Some(v) = record.items.get(pos).copied().flatten() {
                    values[[row, col]] = f64::from(v);
                }
            }
        }
        Ok(Self {
            items: items.to_vec(),
            pupils: records.iter().map(|r| r.pupil_id.clone()).collect(),
            values,
        })
    }

    pub fn n_pupils(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_items(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, pupil: usize) -> ArrayView1<'_, f64> {
        self.values.row(pupil)
    }

    /// Proportion of observed responses equal to 1, per item; NaN when an item
    /// is never observed.
    pub fn proportions(&self) -> Array1<f64> {
        Array1::from_iter(self.values.columns().into_iter().map(|column| {
            let (sum, n) = column
                .iter()
                .filter(|v| is_observed(**v))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 { f64::NAN } else { sum / n as f64 }
        }))
    }

    /// Pupils with at least one observed factor item.
    pub fn scorable_pupils(&self) -> usize {
        self.values
            .rows()
            .into_iter()
            .filter(|row| row.iter().any(|v| is_observed(*v)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assessment(id: &str, catalogue: &Catalogue, set: &[(&str, Option<u8>)]) -> CleanAssessment {
        let mut items = vec![Some(0); catalogue.item_count()];
        for (column, value) in set {
            items[catalogue.item_position(column).unwrap()] = *value;
        }
        CleanAssessment {
            pupil_id: id.to_string(),
            items,
            scale_totals: vec![None; 13],
            domain_totals: vec![None; 6],
            overall: None,
            missing_items: 0,
            mismatches: 0,
        }
    }

    #[test]
    fn test_selects_items_in_requested_order() {
        let catalogue = Catalogue::eyfsp();
        let records = vec![
            assessment("a", &catalogue, &[("kuw_6", Some(1)), ("psed_da_6", None)]),
            assessment("b", &catalogue, &[("psed_da_6", Some(1))]),
        ];
        let items = vec!["psed_da_6".to_string(), "kuw_6".to_string()];
        let matrix = ItemMatrix::from_assessments(&records, &catalogue, &items).unwrap();
        assert_eq!(matrix.n_pupils(), 2);
        assert!(matrix.values[[0, 0]].is_nan());
        assert_eq!(matrix.values[[0, 1]], 1.0);
        assert_eq!(matrix.values[[1, 0]], 1.0);

        let p = matrix.proportions();
        assert_abs_diff_eq!(p[0], 1.0);
        assert_abs_diff_eq!(p[1], 0.5);
        assert_eq!(matrix.scorable_pupils(), 2);
    }

    #[test]
    fn test_unknown_item_is_rejected() {
        let catalogue = Catalogue::eyfsp();
        let err = ItemMatrix::from_assessments(&[], &catalogue, &["kuw_10".to_string()]).unwrap_err();
        assert!(matches!(err, FactorError::UnknownItem(ref item) if item == "kuw_10"));
    }
}
