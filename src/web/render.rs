//! Pure renderers from projections and stored rows to output formats.

use askama::Template;
use std::cmp::Ordering;

use crate::db::{CheckRecord, Target, TargetStatus};
use crate::scheduler::TargetProjection;

/// One dashboard table row, preformatted for display.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRow {
    pub id: i64,
    pub address: String,
    pub name: String,
    pub device_type: String,
    pub importance: String,
    pub remark: String,
    pub status: &'static str,
    pub ping: String,
    pub last5: String,
    pub last60: String,
    pub last_checked: String,
}

impl From<&TargetProjection> for DashboardRow {
    fn from(p: &TargetProjection) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        let percent = |v: Option<u8>| v.map_or_else(|| "n/a".to_string(), |pct| format!("{}%", pct));
        Self {
            id: p.id,
            address: p.address.clone(),
            name: text(&p.name),
            device_type: text(&p.device_type),
            importance: text(&p.importance),
            remark: text(&p.remark),
            status: p.last_status.as_str(),
            ping: p.last_ping_ms.map_or_else(|| "-".to_string(), |ms| format!("{:.1} ms", ms)),
            last5: percent(p.last5),
            last60: percent(p.last60),
            last_checked: p
                .last_checked
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string()),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage {
    pub rows: Vec<DashboardRow>,
    pub total: usize,
    pub down: usize,
}

impl DashboardPage {
    /// Down targets first, then by address.
    pub fn new(projections: &[TargetProjection]) -> Self {
        let mut sorted: Vec<&TargetProjection> = projections.iter().collect();
        sorted.sort_by(|a, b| dashboard_order(a, b));

        Self {
            down: sorted.iter().filter(|p| p.last_status == TargetStatus::Down).count(),
            total: sorted.len(),
            rows: sorted.into_iter().map(DashboardRow::from).collect(),
        }
    }
}

fn dashboard_order(a: &TargetProjection, b: &TargetProjection) -> Ordering {
    let rank = |p: &TargetProjection| u8::from(p.last_status != TargetStatus::Down);
    rank(a).cmp(&rank(b)).then_with(|| a.address.cmp(&b.address))
}

pub fn render_dashboard(projections: &[TargetProjection]) -> Result<String, askama::Error> {
    DashboardPage::new(projections).render()
}

/// CSV dump of the registry followed by check history.
pub fn render_csv(targets: &[Target], checks: &[CheckRecord]) -> String {
    let mut out = String::new();
    let mut row = |fields: &[String]| {
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    };
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();

    row(&["--- targets ---".to_string()]);
    row(&[
        "id", "address", "name", "device_type", "importance", "remark", "last_status", "last_ping_ms",
        "last_checked",
    ]
    .map(String::from));
    for t in targets {
        row(&[
            t.id.to_string(),
            t.address.clone(),
            opt(&t.name),
            opt(&t.device_type),
            opt(&t.importance),
            opt(&t.remark),
            t.last_status.as_str().to_string(),
            num(t.last_ping_ms),
            t.last_checked.map(|c| c.to_rfc3339()).unwrap_or_default(),
        ]);
    }

    row(&[]);
    row(&["--- checks ---".to_string()]);
    row(&["id", "target_id", "time", "status", "ping_ms"].map(String::from));
    for c in checks {
        row(&[
            c.id.to_string(),
            c.target_id.to_string(),
            c.time.to_rfc3339(),
            c.status.as_str().to_string(),
            num(c.ping_ms),
        ]);
    }

    out
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
