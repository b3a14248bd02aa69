use super::value::{FromValue, Value};
use crate::core::common::CompatError;
use std::collections::HashMap;

/// A fetched result row addressable by position and by column name.
///
/// Values are copied out of the driver at fetch time, so a `CompatRow` never
/// borrows cursor state and can be read any number of times. Names are
/// compared verbatim. When a result carries two columns with the same name,
/// name lookup resolves to the last one, as a name-keyed native row would.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompatRow {
    keys: Vec<String>,
    values: Vec<Value>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl CompatRow {
    /// Builds a row from a positional tuple and the result's column names.
    ///
    /// Missing trailing names are filled with `column{n}`; surplus names are ignored.
    #[must_use]
    pub fn from_positional(columns: &[String], values: Vec<Value>) -> Self {
        let keys = (0..values.len())
            .map(|i| columns.get(i).cloned().unwrap_or_else(|| format!("column{i}")))
            .collect();
        Self::assemble(keys, values)
    }

    /// Builds a row from a native name -> value row, keeping its order.
    #[must_use]
    pub fn from_named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let (keys, values) = pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self::assemble(keys, values)
    }

    fn assemble(keys: Vec<String>, values: Vec<Value>) -> Self {
        let by_name = keys.iter().enumerate().map(|(i, k)| (k.clone(), i)).collect();
        Self { keys, values, by_name }
    }

    /// Value at `index`, or `IndexOutOfRange` past the last column.
    pub fn value_at(&self, index: usize) -> Result<&Value, CompatError> {
        self.values
            .get(index)
            .ok_or(CompatError::IndexOutOfRange { index, len: self.values.len() })
    }

    /// Value of column `name`, or `MissingKey`.
    pub fn value_of(&self, name: &str) -> Result<&Value, CompatError> {
        self.position(name)
            .map(|i| &self.values[i])
            .ok_or_else(|| CompatError::MissingKey(name.to_string()))
    }

    /// Typed access by position or name.
    ///
    /// # Errors
    /// `IndexOutOfRange` / `MissingKey` for an unknown column, `Decode` when
    /// the stored value does not convert to `T`.
    pub fn get<T: FromValue, I: RowIndex>(&self, index: I) -> Result<T, CompatError> {
        let position = index.position_in(self)?;
        T::from_value(&self.values[position]).ok_or_else(|| CompatError::Decode {
            column: self.keys[position].clone(),
            message: format!(
                "value {:?} does not convert to {}",
                self.values[position],
                std::any::type_name::<T>()
            ),
        })
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter())
    }

    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        // by_name is skipped by serde; fall back to a scan after deserialization.
        self.by_name
            .get(name)
            .copied()
            .or_else(|| self.keys.iter().rposition(|k| k == name))
    }
}

impl PartialEq for CompatRow {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys && self.values == other.values
    }
}

/// Column addressing for [`CompatRow::get`]: positions and names.
pub trait RowIndex {
    fn position_in(&self, row: &CompatRow) -> Result<usize, CompatError>;
}

impl RowIndex for usize {
    fn position_in(&self, row: &CompatRow) -> Result<usize, CompatError> {
        row.value_at(*self).map(|_| *self)
    }
}

impl RowIndex for &str {
    fn position_in(&self, row: &CompatRow) -> Result<usize, CompatError> {
        row.position(self).ok_or_else(|| CompatError::MissingKey((*self).to_string()))
    }
}

impl std::ops::Index<usize> for CompatRow {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl std::ops::Index<&str> for CompatRow {
    type Output = Value;

    #[allow(clippy::panic)]
    fn index(&self, name: &str) -> &Value {
        match self.position(name) {
            Some(i) => &self.values[i],
            None => panic!("no such column in row: {name}"),
        }
    }
}

impl<'a> IntoIterator for &'a CompatRow {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
