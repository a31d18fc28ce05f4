use crate::core::error::AlignError;
use scraper::{ElementRef, Html, Selector};

/// 表头-单元格对照表
///
/// 同一行内第 n 个 `th` 与第 n 个 `td` 配对；不规则的行只配对实际存在的部分。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledTable {
    entries: Vec<(String, String)>,
}

impl LabeledTable {
    pub fn parse(html: &str) -> Result<Self, AlignError> {
        let document = Html::parse_document(html);
        let row_selector = selector("tr")?;

        let mut entries = Vec::new();
        for row in document.select(&row_selector) {
            // 只取本行的直接子单元格，嵌套表格的行单独配对
            let cells: Vec<ElementRef<'_>> = row.children().filter_map(ElementRef::wrap).collect();
            let labels = cells.iter().filter(|c| c.value().name() == "th");
            let values = cells.iter().filter(|c| c.value().name() == "td");
            entries.extend(labels.zip(values).map(|(l, v)| (cell_text(*l), cell_text(*v))));
        }

        Ok(Self { entries })
    }

    /// 第一个匹配标签的单元格
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, cell)| cell.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn selector(css: &str) -> Result<Selector, AlignError> {
    Selector::parse(css).map_err(|e| AlignError::Table(format!("bad selector {}: {:?}", css, e)))
}

fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
