use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Width assigned to columns created without an explicit width.
pub const DEFAULT_COLUMN_WIDTH: u32 = 150;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Status,
    Date,
    Dropdown,
    Person,
    Checkbox,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Status => "status",
            Self::Date => "date",
            Self::Dropdown => "dropdown",
            Self::Person => "person",
            Self::Checkbox => "checkbox",
        }
    }

    /// Options a freshly created column of this type starts with.
    pub fn default_options(&self) -> Option<Vec<String>> {
        let options: &[&str] = match self {
            Self::Status => &["Option 1", "Option 2", "Option 3"],
            Self::Dropdown => &["Option A", "Option B", "Option C"],
            _ => return None,
        };
        Some(options.iter().map(|o| o.to_string()).collect())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "status" => Ok(Self::Status),
            "date" => Ok(Self::Date),
            "dropdown" => Ok(Self::Dropdown),
            "person" => Ok(Self::Person),
            "checkbox" => Ok(Self::Checkbox),
            _ => Err(format!("Invalid column type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

fn default_width() -> u32 {
    DEFAULT_COLUMN_WIDTH
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            column_type,
            width: DEFAULT_COLUMN_WIDTH,
            options: column_type.default_options(),
        }
    }
}

/// A board row. Cell values are keyed by column id and stored flat next to
/// the item id on the wire: `{"id": "1", "<column-id>": <value>, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, column_id: impl Into<String>, value: Value) -> Self {
        self.values.insert(column_id.into(), value);
        self
    }

    pub fn value(&self, column_id: &str) -> Option<&Value> {
        self.values.get(column_id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoardError {
    #[error("Item {0} not found")]
    UnknownItem(String),

    #[error("Column {0} not found")]
    UnknownColumn(String),
}

/// Cells and position captured when a column is removed, enough to put it back.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRemoval {
    pub index: usize,
    pub column: Column,
    pub cells: Vec<(String, Value)>,
}

/// The columns and items of one board: the unit that autosave persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BoardSnapshot {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl BoardSnapshot {
    pub fn new(columns: Vec<Column>, items: Vec<Item>) -> Self {
        Self { columns, items }
    }

    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    /// Set one cell, returning the value it held before.
    pub fn set_cell(
        &mut self,
        item_id: &str,
        column_id: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>, BoardError> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| BoardError::UnknownItem(item_id.to_string()))?;
        let previous = match value {
            Some(v) => item.values.insert(column_id.to_string(), v),
            None => item.values.remove(column_id),
        };
        Ok(previous)
    }

    /// Insert an item at `index`, clamped to the end of the list.
    pub fn insert_item(&mut self, index: usize, item: Item) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
    }

    pub fn remove_item(&mut self, item_id: &str) -> Result<(usize, Item), BoardError> {
        let index = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| BoardError::UnknownItem(item_id.to_string()))?;
        Ok((index, self.items.remove(index)))
    }

    /// Build the next item for this board: titled "Item N" in the first column.
    pub fn next_item(&self) -> Item {
        let item = Item::new(uuid::Uuid::new_v4().to_string());
        match self.columns.first() {
            Some(first) => item.with_value(
                first.id.clone(),
                Value::String(format!("Item {}", self.items.len() + 1)),
            ),
            None => item,
        }
    }

    pub fn insert_column(&mut self, index: usize, column: Column) {
        let index = index.min(self.columns.len());
        self.columns.insert(index, column);
    }

    pub fn rename_column(&mut self, column_id: &str, name: &str) -> Result<String, BoardError> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or_else(|| BoardError::UnknownColumn(column_id.to_string()))?;
        Ok(std::mem::replace(&mut column.name, name.to_string()))
    }

    /// Remove a column and strip its cells from every item.
    pub fn remove_column(&mut self, column_id: &str) -> Result<ColumnRemoval, BoardError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.id == column_id)
            .ok_or_else(|| BoardError::UnknownColumn(column_id.to_string()))?;
        let column = self.columns.remove(index);
        let cells = self
            .items
            .iter_mut()
            .filter_map(|item| {
                item.values
                    .remove(column_id)
                    .map(|value| (item.id.clone(), value))
            })
            .collect();
        Ok(ColumnRemoval {
            index,
            column,
            cells,
        })
    }

    /// Undo a [`BoardSnapshot::remove_column`].
    pub fn restore_column(&mut self, removal: ColumnRemoval) {
        let column_id = removal.column.id.clone();
        self.insert_column(removal.index, removal.column);
        for (item_id, value) in removal.cells {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
                item.values.insert(column_id.clone(), value);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub board: BoardSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board() -> BoardSnapshot {
        BoardSnapshot::new(
            vec![
                Column {
                    id: "name".to_string(),
                    name: "Name".to_string(),
                    column_type: ColumnType::Text,
                    width: 200,
                    options: None,
                },
                Column {
                    id: "status".to_string(),
                    name: "Status".to_string(),
                    column_type: ColumnType::Status,
                    width: 150,
                    options: ColumnType::Status.default_options(),
                },
            ],
            vec![
                Item::new("1")
                    .with_value("name", json!("Task 1"))
                    .with_value("status", json!("In Progress")),
                Item::new("2").with_value("name", json!("Task 2")),
            ],
        )
    }

    #[test]
    fn test_item_serializes_cells_flat() {
        let item = Item::new("42").with_value("status", json!("Done"));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({"id": "42", "status": "Done"}));
        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back.value("status"), Some(&json!("Done")));
    }

    #[test]
    fn test_column_type_serialized_as_type() {
        let column = Column::new("Due", ColumnType::Date);
        let value = serde_json::to_value(&column).unwrap();
        assert_eq!(value["type"], "date");
        assert_eq!(value["width"], DEFAULT_COLUMN_WIDTH);
        assert!(value.get("options").is_none());
    }

    #[test]
    fn test_new_status_and_dropdown_columns_get_default_options() {
        assert_eq!(Column::new("S", ColumnType::Status).options.unwrap().len(), 3);
        assert_eq!(Column::new("D", ColumnType::Dropdown).options.unwrap().len(), 3);
        assert!(Column::new("C", ColumnType::Checkbox).options.is_none());
    }

    #[test]
    fn test_set_cell_returns_previous_value() {
        let mut b = board();
        let prev = b.set_cell("1", "status", Some(json!("Done"))).unwrap();
        assert_eq!(prev, Some(json!("In Progress")));
        let prev = b.set_cell("2", "status", Some(json!("Done"))).unwrap();
        assert_eq!(prev, None);
        assert_eq!(
            b.set_cell("9", "status", None),
            Err(BoardError::UnknownItem("9".to_string()))
        );
    }

    #[test]
    fn test_remove_and_restore_column_keeps_cells() {
        let mut b = board();
        let original = b.clone();
        let removal = b.remove_column("status").unwrap();
        assert_eq!(removal.index, 1);
        assert_eq!(removal.cells.len(), 1);
        assert!(b.item("1").unwrap().value("status").is_none());
        b.restore_column(removal);
        assert_eq!(b, original);
    }

    #[test]
    fn test_next_item_titles_first_column() {
        let b = board();
        let item = b.next_item();
        assert_eq!(item.value("name"), Some(&json!("Item 3")));
        assert!(BoardSnapshot::default().next_item().values.is_empty());
    }

    #[test]
    fn test_remove_item_reports_index() {
        let mut b = board();
        let (index, item) = b.remove_item("2").unwrap();
        assert_eq!(index, 1);
        b.insert_item(index, item);
        assert_eq!(b, board());
    }

    #[test]
    fn test_column_type_from_str() {
        assert_eq!("person".parse::<ColumnType>().unwrap(), ColumnType::Person);
        assert!("color".parse::<ColumnType>().is_err());
    }
}
