//! Buffered result aggregator, used when the caller supplies no callback

use crate::db::{QueryItem, ResultSet, RowStream};
use crate::error::{ConnectorError, ConnectorResult};
use futures::StreamExt;

/// Materialize every result set of `items`, in statement order.
///
/// The first driver error aborts the whole query; no partial sets are returned.
pub async fn collect_results(mut items: RowStream<'_>) -> ConnectorResult<Vec<ResultSet>> {
    let mut sets: Vec<ResultSet> = Vec::new();

    while let Some(item) = items.next().await {
        match item.map_err(ConnectorError::query)? {
            QueryItem::Columns(meta) => sets.push(ResultSet::new(meta)),
            QueryItem::Row(row) => sets
                .last_mut()
                .ok_or_else(|| ConnectorError::query("row received before column metadata"))?
                .rows
                .push(row),
        }
    }

    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CellValue;
    use anyhow::anyhow;

    fn stream(items: Vec<anyhow::Result<QueryItem>>) -> RowStream<'static> {
        futures::stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_each_statement_becomes_one_set() {
        let items = vec![
            Ok(QueryItem::Columns(vec!["id".into(), "name".into()])),
            Ok(QueryItem::Row(vec![CellValue::Int(0), CellValue::String("name0".into())])),
            Ok(QueryItem::Row(vec![CellValue::Int(3), CellValue::String("name3".into())])),
            Ok(QueryItem::Columns(vec!["id".into()])),
            Ok(QueryItem::Columns(vec!["x".into()])),
            Ok(QueryItem::Row(vec![CellValue::Null])),
        ];

        let sets = collect_results(stream(items)).await.unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].meta, vec!["id", "name"]);
        assert_eq!(sets[0].row_count(), 2);
        assert_eq!(sets[1].row_count(), 0);
        assert_eq!(sets[2].rows, vec![vec![CellValue::Null]]);
    }

    #[tokio::test]
    async fn test_error_discards_partial_aggregate() {
        let items = vec![
            Ok(QueryItem::Columns(vec!["id".into()])),
            Ok(QueryItem::Row(vec![CellValue::Int(1)])),
            Err(anyhow!("no such table: sellerkind")),
        ];

        let err = collect_results(stream(items)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Query(ref m) if m.contains("sellerkind")));
    }

    #[tokio::test]
    async fn test_row_without_columns_is_rejected() {
        let items = vec![Ok(QueryItem::Row(vec![CellValue::Int(1)]))];
        assert!(collect_results(stream(items)).await.is_err());
    }
}
