use serde_json::{Map, Value};

use crate::domain::{EntityDescriptor, Record};
use crate::error::ApiError;

pub const DEFAULT_LIMIT: u32 = 10;

/// Pagination request parameters. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageParams {
    pub limit: u32,
    pub page: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            page: 1,
        }
    }
}

impl PageParams {
    pub fn new(limit: u32, page: u32) -> Self {
        Self {
            limit: limit.max(1),
            page: page.max(1),
        }
    }

    /// Changing the page size always starts over at the first page.
    pub fn with_limit(self, limit: u32) -> Self {
        Self::new(limit, 1)
    }

    pub fn with_page(self, page: u32) -> Self {
        Self::new(self.limit, page)
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("limit".to_string(), self.limit.to_string()),
            ("page".to_string(), self.page.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageMeta {
    pub total: u64,
    /// Any other pagination metadata the server sent along.
    pub extra: Map<String, Value>,
}

impl PageMeta {
    pub fn page_count(&self, limit: u32) -> u32 {
        let limit = u64::from(limit.max(1));
        let pages = self.total.div_ceil(limit).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub data: Vec<Record>,
    pub meta: PageMeta,
}

impl Page {
    /// Decodes a `{ data: [...], meta: { total, ... } }` list response.
    pub fn decode(descriptor: &EntityDescriptor, body: &Value) -> Result<Page, ApiError> {
        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ApiError::Decode(format!("{}: list response has no data array", descriptor.name))
            })?;
        let data = rows
            .iter()
            .map(|row| Record::decode(descriptor, row))
            .collect::<Result<Vec<_>, _>>()?;

        let mut extra = body
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let total = match extra.remove("total") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(data.len() as u64);

        Ok(Page {
            data,
            meta: PageMeta { total, extra },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldKind, FieldSpec, IdKind};
    use serde_json::json;

    fn tags() -> EntityDescriptor {
        EntityDescriptor {
            name: "tags".into(),
            label: "Tags".into(),
            path: "/tags".into(),
            id_field: "tag_id".into(),
            id_kind: IdKind::Integer,
            fields: vec![FieldSpec {
                name: "tag_id".into(),
                label: None,
                kind: FieldKind::Integer,
                required: false,
                options: vec![],
            }],
        }
    }

    #[test]
    fn with_limit_resets_page() {
        let params = PageParams::new(10, 4).with_limit(25);
        assert_eq!(params, PageParams { limit: 25, page: 1 });
        assert_eq!(PageParams::new(0, 0), PageParams { limit: 1, page: 1 });
    }

    #[test]
    fn page_count_rounds_up() {
        let meta = PageMeta {
            total: 12,
            extra: Map::new(),
        };
        assert_eq!(meta.page_count(5), 3);
        assert_eq!(PageMeta::default().page_count(5), 1);
    }

    #[test]
    fn decodes_meta_and_keeps_extra_fields() {
        let page = Page::decode(
            &tags(),
            &json!({
                "data": [{ "tag_id": 1 }, { "tag_id": 2 }],
                "meta": { "total": "40", "lastPage": 20 }
            }),
        )
        .unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.meta.total, 40);
        assert_eq!(page.meta.extra.get("lastPage"), Some(&json!(20)));

        let bare = Page::decode(&tags(), &json!({ "data": [{ "tag_id": 1 }] })).unwrap();
        assert_eq!(bare.meta.total, 1);
        assert!(Page::decode(&tags(), &json!({ "rows": [] })).is_err());
    }
}
