use std::fmt::Write;

use crate::domain::{EntityDescriptor, Record, RecordId};
use crate::query::ListState;
use crate::screen::FormState;

const MAX_CELL: usize = 32;

/// Text table for the list view, filtered by `search`.
pub fn render_list(descriptor: &EntityDescriptor, state: &ListState, search: &str) -> String {
    let mut out = String::new();

    if let Some(error) = &state.error {
        let _ = writeln!(out, "Error: {error}");
        return out;
    }
    let Some(page) = &state.page else {
        out.push_str(if state.is_loading { "Loading...\n" } else { "No data\n" });
        return out;
    };

    let pages = page.meta.page_count(state.params.limit);
    let _ = write!(
        out,
        "{} (page {} of {}, {} total, {} per page)",
        descriptor.label, state.params.page, pages, page.meta.total, state.params.limit
    );
    if state.is_placeholder {
        out.push_str(" loading...");
    }
    out.push('\n');
    if !search.trim().is_empty() {
        let _ = writeln!(out, "Search: {}", search.trim());
    }

    let rows: Vec<&Record> = page.data.iter().filter(|r| r.matches_search(search)).collect();
    let headers: Vec<&str> = descriptor.fields.iter().map(|f| f.label()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|record| {
            descriptor
                .fields
                .iter()
                .map(|f| truncate(record.get(&f.name).map(ToString::to_string).unwrap_or_default()))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    write_row(&mut out, headers.iter().copied(), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut out, rule.iter().map(String::as_str), &widths);
    for row in &cells {
        write_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    if rows.is_empty() {
        out.push_str("(no matching rows)\n");
    }
    out
}

/// The create/edit form with its current raw inputs.
pub fn render_form(form: &FormState, editing: Option<&RecordId>) -> String {
    let descriptor = form.descriptor();
    let mut out = match editing {
        Some(id) => format!("Edit {} {}\n", descriptor.label, id),
        None => format!("New {}\n", descriptor.label),
    };
    for (spec, raw) in form.inputs() {
        let marker = if spec.required { "*" } else { "" };
        let _ = writeln!(out, "  {}{} ({}): {}", spec.label(), marker, spec.kind, raw);
    }
    out
}

fn write_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join(" | ").trim_end());
    out.push('\n');
}

fn truncate(value: String) -> String {
    if value.chars().count() <= MAX_CELL {
        return value;
    }
    let mut cut: String = value.chars().take(MAX_CELL - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::domain::{FieldValue, Page, PageMeta, PageParams};
    use crate::error::ApiError;

    fn state(page: Option<Page>) -> ListState {
        ListState {
            params: PageParams::new(5, 1),
            page,
            is_placeholder: false,
            is_loading: false,
            is_fetching: false,
            error: None,
        }
    }

    fn brand(id: i64, name: &str) -> Record {
        Record::new()
            .with("brand_id", FieldValue::Integer(id))
            .with("name", FieldValue::Text(name.into()))
    }

    #[test]
    fn renders_table_with_page_summary() {
        let desc = Catalog::builtin().unwrap().get("brands").unwrap();
        let page = Page {
            data: vec![brand(1, "Acme"), brand(2, "Globex")],
            meta: PageMeta {
                total: 12,
                ..PageMeta::default()
            },
        };

        let text = render_list(&desc, &state(Some(page)), "glob");
        assert!(text.starts_with("Brands (page 1 of 3, 12 total, 5 per page)"));
        assert!(text.contains("Globex"));
        assert!(!text.contains("Acme"));
    }

    #[test]
    fn renders_errors_and_loading() {
        let desc = Catalog::builtin().unwrap().get("brands").unwrap();
        let mut failed = state(None);
        failed.error = Some(ApiError::Network("connection refused".into()));
        assert_eq!(
            render_list(&desc, &failed, ""),
            "Error: network error: connection refused\n"
        );

        let mut loading = state(None);
        loading.is_loading = true;
        assert_eq!(render_list(&desc, &loading, ""), "Loading...\n");
    }

    #[test]
    fn long_values_are_truncated() {
        let long = "x".repeat(40);
        let cut = truncate(long);
        assert_eq!(cut.chars().count(), MAX_CELL);
        assert!(cut.ends_with('…'));
    }
}
