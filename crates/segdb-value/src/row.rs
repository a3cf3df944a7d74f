use crate::{
    heap_size::HeapSize,
    scalar::Scalar,
};

/// A single row: one [`Scalar`] per column in the owning [`RowSchema`](crate::schema::RowSchema).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row(pub Vec<Scalar>);

impl Row {
    pub fn new(values: Vec<Scalar>) -> Self {
        Row(values)
    }

    pub fn column(&self, idx: usize) -> Option<&Scalar> {
        self.0.get(idx)
    }

    pub fn project(&self, columns: &[usize]) -> Vec<Scalar> {
        columns.iter().map(|&c| self.0[c].clone()).collect()
    }
}

impl HeapSize for Row {
    fn heap_size(&self) -> usize {
        self.0.heap_size()
    }
}

impl FromIterator<Scalar> for Row {
    fn from_iter<T: IntoIterator<Item = Scalar>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}
