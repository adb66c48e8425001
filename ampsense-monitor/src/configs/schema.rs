use crate::models::{PowerRecordTable, Table};

pub struct SchemaManager {
    tables: Vec<Box<dyn Table>>,
}

impl SchemaManager {
    pub fn new(mut tables: Vec<Box<dyn Table>>) -> Self {
        Self::sort_tables(&mut tables);
        Self { tables }
    }

    fn sort_tables(tables: &mut Vec<Box<dyn Table>>) {
        let mut remaining = std::mem::take(tables);
        let mut sorted: Vec<Box<dyn Table>> = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, table)| {
                    table
                        .dependencies()
                        .iter()
                        .all(|dep| sorted.iter().any(|done| done.name() == *dep))
                })
                .map(|(index, _)| index)
                .collect();

            assert!(!ready.is_empty(), "circular table dependency in schema");

            for &index in ready.iter().rev() {
                sorted.push(remaining.swap_remove(index));
            }
        }

        *tables = sorted;
    }

    pub fn create_schema(&self) -> Vec<String> {
        self.tables.iter().map(|table| table.create()).collect()
    }

    pub fn dispose_schema(&self) -> Vec<String> {
        self.tables.iter().rev().map(|table| table.dispose()).collect()
    }
}

impl Default for SchemaManager {
    fn default() -> Self {
        SchemaManager::new(vec![Box::new(PowerRecordTable)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockPanelTable;
    impl Table for MockPanelTable {
        fn name(&self) -> &'static str {
            "panels"
        }
        fn create(&self) -> String {
            "CREATE TABLE panels;".to_string()
        }
        fn dispose(&self) -> String {
            "DROP TABLE panels;".to_string()
        }
        fn dependencies(&self) -> Vec<&'static str> {
            vec![]
        }
    }

    struct MockRecordTable;
    impl Table for MockRecordTable {
        fn name(&self) -> &'static str {
            "records"
        }
        fn create(&self) -> String {
            "CREATE TABLE records;".to_string()
        }
        fn dispose(&self) -> String {
            "DROP TABLE records;".to_string()
        }
        fn dependencies(&self) -> Vec<&'static str> {
            vec!["panels"]
        }
    }

    #[test]
    fn test_dependencies_order_creation() {
        let manager =
            SchemaManager::new(vec![Box::new(MockRecordTable), Box::new(MockPanelTable)]);

        let statements = manager.create_schema();
        assert_eq!(
            statements,
            vec!["CREATE TABLE panels;", "CREATE TABLE records;"]
        );
    }

    #[test]
    fn test_dispose_reverses_creation() {
        let manager =
            SchemaManager::new(vec![Box::new(MockRecordTable), Box::new(MockPanelTable)]);

        let statements = manager.dispose_schema();
        assert_eq!(statements, vec!["DROP TABLE records;", "DROP TABLE panels;"]);
    }
}
