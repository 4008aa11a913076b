//! Minimal HTML table rendering for report emails.

use std::fmt::Write;

use html_escape::encode_text;

/// Two-decimal cell; missing values render blank.
pub fn num(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.2}")).unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct HtmlTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl HtmlTable {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn render(&self) -> String {
        let mut html = String::from("<table border=\"1\" class=\"dataframe\">\n<thead>\n<tr>");
        for h in &self.headers {
            let _ = write!(html, "<th>{}</th>", encode_text(h));
        }
        html.push_str("</tr>\n</thead>\n<tbody>\n");
        for row in &self.rows {
            html.push_str("<tr>");
            for cell in row {
                let _ = write!(html, "<td>{}</td>", encode_text(cell));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>");
        html
    }
}

/// Bold heading followed by the table.
pub fn document(title: &str, table: &HtmlTable) -> String {
    format!("<h2><b>{}</b></h2><p>{}</p>", encode_text(title), table.render())
}
