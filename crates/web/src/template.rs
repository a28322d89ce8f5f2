//! HTML dashboard template
//!
//! The page is a single self-contained document. Chart data is embedded as
//! JSON and drawn by Chart.js when the CDN script loads; KPIs, the spec list
//! and the failure tree are plain HTML and work without it.

use std::path::Path;

use serde_json::{json, Map, Value};

use funnel_common::RunStatistics;

use crate::view::{
    build_view, Axis, ChartKind, ChartSpec, DashboardView, Kpis, RenderOptions, ScopeView, SeriesRole,
    SpecNode,
};

/// Chart.js build loaded by the page
pub const CHART_JS_CDN: &str = "https://cdn.jsdelivr.net/npm/chart.js@4.4.1/dist/chart.umd.min.js";

/// Turns a [`DashboardView`] into a document
pub trait DashboardTemplate: Send + Sync {
    fn render(&self, view: &DashboardView) -> String;
}

/// The built-in single-page HTML dashboard
#[derive(Debug, Clone)]
pub struct HtmlTemplate {
    /// Chart library script; charts are skipped when `None`
    pub chart_js_url: Option<String>,
}

impl Default for HtmlTemplate {
    fn default() -> Self {
        Self {
            chart_js_url: Some(CHART_JS_CDN.to_string()),
        }
    }
}

impl DashboardTemplate for HtmlTemplate {
    fn render(&self, view: &DashboardView) -> String {
        let mut body = String::new();
        let mut charts = Map::new();

        body.push_str(&format!(
            "<header>\n<h1>🚀 {}</h1>\n<div class=\"meta\">{}</div>\n</header>\n",
            escape_html(&view.title),
            escape_html(&run_meta(view)),
        ));

        if view.is_empty() {
            body.push_str(
                "<div class=\"no-data\"><span>📭</span>No data: no test results were recorded for this run.</div>\n",
            );
        } else {
            body.push_str(&scope_section(&view.overall, &mut charts));

            body.push_str("<section class=\"failures-section\">\n<h2>⚠️ Failures by Spec</h2>\n");
            if view.all_passed() {
                body.push_str("<div class=\"no-failures\"><span>✅</span>All tests passed!</div>\n");
            } else {
                for spec in &view.failures {
                    body.push_str(&spec_failures(spec));
                }
            }
            body.push_str("</section>\n");

            body.push_str("<section class=\"specs-section\">\n<h2>📄 Specs</h2>\n");
            for scope in &view.specs {
                body.push_str(&format!(
                    "<div class=\"scope-group\">\n<div class=\"scope-header toggle\"><span class=\"scope-name\"><span class=\"arrow\">▶</span> {}</span><span class=\"scope-count\">{} runs · {:.1}%</span></div>\n<div class=\"scope-content\">\n{}</div>\n</div>\n",
                    escape_html(&scope.name),
                    scope.kpis.total,
                    scope.kpis.success_rate,
                    scope_section(scope, &mut charts),
                ));
            }
            body.push_str("</section>\n");
        }

        let chart_script = self
            .chart_js_url
            .as_ref()
            .map(|url| format!("<script src=\"{}\"></script>\n", escape_html(url)))
            .unwrap_or_default();

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n<title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n<div class=\"container\">\n{body}</div>\n<script id=\"funnel-charts\" type=\"application/json\">{charts}</script>\n<script id=\"funnel-viewer\" type=\"application/json\">{viewer}</script>\n{chart_script}<script>{script}</script>\n</body>\n</html>\n",
            title = escape_html(&view.title),
            style = STYLE,
            body = body,
            charts = escape_script_json(&Value::Object(charts)),
            viewer = escape_script_json(&view.viewer),
            chart_script = chart_script,
            script = SCRIPT,
        )
    }
}

fn run_meta(view: &DashboardView) -> String {
    let fmt = |t: chrono::DateTime<chrono::Utc>| t.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let mut parts = Vec::new();
    if let Some(start) = view.start_time {
        parts.push(format!("Started {}", fmt(start)));
    }
    if let Some(end) = view.end_time {
        parts.push(format!("Finished {}", fmt(end)));
    }
    parts.push(format!("{} workers", view.workers));
    parts.push(format!("Generated {}", fmt(view.generated_at)));
    parts.join(" · ")
}

fn scope_section(scope: &ScopeView, charts: &mut Map<String, Value>) -> String {
    let mut out = format!("<section class=\"scope\" id=\"{}\">\n", escape_html(&scope.id));
    out.push_str(&kpi_cards(&scope.kpis));

    out.push_str("<div class=\"charts\">\n");
    for (name, spec) in scope.charts() {
        let canvas_id = format!("{}-{}", scope.id, name);
        out.push_str(&format!("<div class=\"chart-box\">\n<h3>{}</h3>\n", chart_title(name)));
        if spec.is_empty() {
            out.push_str("<div class=\"chart-empty\">No data</div>\n");
        } else {
            out.push_str(&format!(
                "<div class=\"chart-wrap\"><canvas id=\"{}\"></canvas></div>\n",
                escape_html(&canvas_id)
            ));
            charts.insert(canvas_id, chartjs_config(spec));
        }
        out.push_str("</div>\n");
    }
    out.push_str("</div>\n</section>\n");
    out
}

fn chart_title(name: &str) -> &'static str {
    match name {
        "steps" => "Step results",
        "timeline" => "Completions over time",
        _ => "Duration distribution",
    }
}

fn kpi_cards(k: &Kpis) -> String {
    let mut cards = vec![
        card("", &k.total.to_string(), "Total Runs"),
        card("passed", &k.passed.to_string(), "Passed"),
        card("failed", &k.failed.to_string(), "Failed"),
        card("rate", &format!("{:.1}%", k.success_rate), "Success Rate"),
        card("", &format!("{:.1}/min", k.throughput_per_min), "Throughput"),
        card("", &format_ms(k.avg_duration_ms), "Avg Duration"),
    ];
    if k.skipped > 0 {
        cards.push(card("skipped", &k.skipped.to_string(), "Skipped"));
    }
    match &k.top_failing_step {
        Some(top) => cards.push(card(
            "failed top-step",
            &format!("{} ({}x)", top.title, top.failed),
            "Top Failing Step",
        )),
        None => cards.push(card("top-step", "None", "Top Failing Step")),
    }
    format!("<div class=\"stats\">\n{}</div>\n", cards.concat())
}

fn card(class: &str, value: &str, label: &str) -> String {
    format!(
        "<div class=\"stat-card {}\"><div class=\"stat-value\">{}</div><div class=\"stat-label\">{}</div></div>\n",
        class,
        escape_html(value),
        label
    )
}

fn format_ms(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.1}s", ms / 1000.0)
    }
}

fn spec_failures(spec: &SpecNode) -> String {
    let mut steps = String::new();
    for step in &spec.steps {
        let mut signatures = String::new();
        for sig in &step.signatures {
            let traces = if sig.traces.is_empty() {
                "<div class=\"trace-item\">No traces available</div>\n".to_string()
            } else {
                sig.traces
                    .iter()
                    .map(|t| {
                        format!(
                            "<div class=\"trace-item\"><span class=\"trace-info\">Run #{} · {} · {}</span><button class=\"trace-link\" data-trace=\"{}\">📋 View Trace</button></div>\n",
                            t.run,
                            escape_html(&t.title),
                            t.timestamp.format("%H:%M:%S"),
                            escape_html(&t.href),
                        )
                    })
                    .collect()
            };
            signatures.push_str(&format!(
                "<div class=\"error-group\">\n<div class=\"error-header toggle\"><span class=\"arrow\">▶</span><span class=\"error-message\" title=\"{sig}\">{sig}</span><span class=\"error-count\">{count}x</span></div>\n<div class=\"traces-list\">\n{traces}</div>\n</div>\n",
                sig = escape_html(&sig.signature),
                count = sig.count,
                traces = traces,
            ));
        }
        steps.push_str(&format!(
            "<div class=\"step-group\">\n<div class=\"step-header toggle\"><span class=\"step-name\"><span class=\"arrow\">▶</span> {}</span><span class=\"step-count\">{}x</span></div>\n<div class=\"step-content\">\n{}</div>\n</div>\n",
            escape_html(&step.step),
            step.count,
            signatures,
        ));
    }
    format!(
        "<div class=\"spec-group\">\n<div class=\"spec-header toggle\"><span class=\"spec-name\"><span class=\"arrow\">▶</span> 📄 {}</span><span class=\"spec-count\">{} failures</span></div>\n<div class=\"spec-content\">\n{}</div>\n</div>\n",
        escape_html(&spec.spec),
        spec.count,
        steps,
    )
}

fn role_color(role: SeriesRole) -> &'static str {
    match role {
        SeriesRole::Passed => "#4ade80",
        SeriesRole::Failed => "#f87171",
        SeriesRole::Cumulative => "#60a5fa",
        SeriesRole::Count => "#a78bfa",
    }
}

fn kind_name(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::Bar => "bar",
        ChartKind::Line => "line",
    }
}

/// Chart.js configuration for one chart.
pub fn chartjs_config(spec: &ChartSpec) -> Value {
    let datasets: Vec<Value> = spec
        .datasets
        .iter()
        .map(|d| {
            json!({
                "type": kind_name(d.kind),
                "label": d.label,
                "data": d.data,
                "backgroundColor": role_color(d.role),
                "borderColor": role_color(d.role),
                "yAxisID": match d.axis {
                    Axis::Primary => "y",
                    Axis::Secondary => "y1",
                },
                // lines draw above bars
                "order": if d.kind == ChartKind::Line { 0 } else { 1 },
                "tension": 0.2,
                "fill": false,
            })
        })
        .collect();

    let ticks = json!({ "color": "#94a3b8" });
    let grid = json!({ "color": "#334155" });
    let mut scales = json!({
        "x": { "stacked": spec.stacked, "ticks": ticks, "grid": grid },
        "y": { "stacked": spec.stacked, "beginAtZero": true, "position": "left", "ticks": ticks, "grid": grid },
    });
    if spec.has_secondary_axis() {
        scales["y1"] = json!({
            "beginAtZero": true,
            "position": "right",
            "ticks": ticks,
            "grid": { "drawOnChartArea": false },
        });
    }

    json!({
        "type": kind_name(spec.kind),
        "data": { "labels": spec.labels, "datasets": datasets },
        "options": {
            "responsive": true,
            "maintainAspectRatio": false,
            "scales": scales,
            "plugins": { "legend": { "labels": { "color": "#e2e8f0" } } },
        },
    })
}

/// Render `stats` and write the document to `path`, creating its directory.
pub fn write_dashboard(
    stats: &RunStatistics,
    options: &RenderOptions,
    template: &dyn DashboardTemplate,
    path: &Path,
) -> std::io::Result<()> {
    let html = template.render(&build_view(stats, options));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
}

/// Escape text for HTML element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize `value` as JSON that is safe inside a `<script>` element.
pub fn escape_script_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    // Serializing plain view data cannot fail; fall back to null if it ever does
    let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
* { box-sizing: border-box; margin: 0; padding: 0; }
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
  background: #0f172a; color: #e2e8f0; padding: 20px;
}
.container { max-width: 1200px; margin: 0 auto; }
h1 { margin-bottom: 6px; color: #f8fafc; }
h2 { margin: 30px 0 15px; }
h3 { font-size: 14px; color: #94a3b8; margin-bottom: 10px; }
.meta { color: #64748b; font-size: 13px; margin-bottom: 20px; }

.stats { display: grid; grid-template-columns: repeat(4, 1fr); gap: 15px; margin-bottom: 20px; }
.stat-card { background: #1e293b; padding: 20px; border-radius: 12px; text-align: center; }
.stat-value { font-size: 30px; font-weight: bold; overflow-wrap: anywhere; }
.stat-label { color: #94a3b8; margin-top: 5px; }
.stat-card.passed .stat-value { color: #4ade80; }
.stat-card.failed .stat-value { color: #f87171; }
.stat-card.rate .stat-value { color: #60a5fa; }
.stat-card.skipped .stat-value { color: #fbbf24; }
.stat-card.top-step .stat-value { font-size: 18px; }

.charts { display: grid; grid-template-columns: repeat(auto-fit, minmax(340px, 1fr)); gap: 15px; }
.chart-box { background: #1e293b; border-radius: 12px; padding: 15px; }
.chart-wrap { position: relative; height: 240px; }
.chart-empty { color: #64748b; text-align: center; padding: 40px 0; }
.chart-box.no-chart .chart-wrap { display: none; }

.failures-section h2 { color: #f87171; }
.spec-group, .scope-group { background: #1e293b; border-radius: 12px; margin-bottom: 15px; overflow: hidden; }
.spec-header, .scope-header {
  padding: 15px 20px; cursor: pointer; display: flex;
  justify-content: space-between; align-items: center; transition: background 0.2s;
}
.spec-header { background: #7c3aed; }
.spec-header:hover { background: #6d28d9; }
.scope-header { background: #334155; }
.scope-header:hover { background: #475569; }
.spec-name, .scope-name { font-weight: 600; font-size: 16px; }
.spec-count, .scope-count {
  background: rgba(255,255,255,0.2); color: white; padding: 4px 12px;
  border-radius: 20px; font-size: 14px;
}
.spec-content, .step-content, .traces-list, .scope-content { display: none; }
.spec-group.open .spec-content, .step-group.open .step-content,
.error-group.open .traces-list { display: block; }
.scope-group.open .scope-content { display: block; padding: 15px; }

.step-group { border-top: 1px solid #334155; }
.step-header {
  padding: 12px 20px 12px 30px; cursor: pointer; display: flex;
  justify-content: space-between; align-items: center; background: #334155;
}
.step-header:hover, .step-group.open .step-header { background: #475569; }
.step-name { font-weight: 600; font-size: 14px; color: #f87171; }
.step-count { background: #ef4444; color: white; padding: 3px 10px; border-radius: 15px; font-size: 12px; }

.error-group { border-top: 1px solid #1e293b; }
.error-header {
  padding: 10px 20px 10px 50px; cursor: pointer;
  display: flex; justify-content: space-between; align-items: center;
}
.error-header:hover, .error-group.open .error-header { background: #334155; }
.error-message {
  color: #fbbf24; font-family: monospace; font-size: 12px;
  flex: 1; overflow: hidden; text-overflow: ellipsis; white-space: nowrap;
}
.error-count {
  background: #f59e0b; color: #1e293b; padding: 2px 8px;
  border-radius: 10px; font-size: 11px; margin-left: 10px; flex-shrink: 0;
}
.traces-list { padding: 10px 20px 15px 70px; }
.trace-item {
  background: #0f172a; padding: 10px 15px; border-radius: 8px; margin-bottom: 8px;
  display: flex; justify-content: space-between; align-items: center;
}
.trace-info { font-size: 12px; color: #94a3b8; }
.trace-link {
  background: #3b82f6; color: white; padding: 5px 10px; border-radius: 6px;
  font-size: 11px; border: none; cursor: pointer;
}
.trace-link:hover { background: #2563eb; }
.trace-link:disabled { opacity: 0.7; cursor: wait; }
.trace-link.viewed { background: #22c55e; }

.no-failures, .no-data {
  text-align: center; padding: 40px; background: #1e293b; border-radius: 12px;
}
.no-failures { color: #4ade80; }
.no-data { color: #94a3b8; }
.no-failures span, .no-data span { font-size: 48px; display: block; margin-bottom: 10px; }

.arrow { display: inline-block; transition: transform 0.2s; margin-right: 8px; }
.open > .toggle .arrow { transform: rotate(90deg); }
"#;

const SCRIPT: &str = r#"
(function () {
  document.querySelectorAll('.toggle').forEach(function (header) {
    header.addEventListener('click', function (e) {
      e.stopPropagation();
      header.parentElement.classList.toggle('open');
    });
  });

  var viewer = JSON.parse(document.getElementById('funnel-viewer').textContent);
  var charts = JSON.parse(document.getElementById('funnel-charts').textContent);

  if (window.Chart) {
    Object.keys(charts).forEach(function (id) {
      var canvas = document.getElementById(id);
      if (canvas) { new Chart(canvas, charts[id]); }
    });
  } else {
    document.querySelectorAll('.chart-box').forEach(function (box) {
      box.classList.add('no-chart');
    });
  }

  function viewed(btn) {
    btn.textContent = '✅ Viewed';
    btn.classList.add('viewed');
    btn.disabled = false;
  }

  function failed(btn, text, message) {
    btn.textContent = text;
    btn.disabled = false;
    alert(message);
  }

  function remoteViewerUrl(tracePath) {
    var base = (viewer.publicBaseUrl || window.location.origin).replace(/\/$/, '');
    return viewer.remoteUrl + '?trace=' + encodeURIComponent(base + tracePath);
  }

  function openTrace(btn) {
    var tracePath = btn.getAttribute('data-trace');
    var original = btn.textContent;
    btn.textContent = '⏳ Opening...';
    btn.disabled = true;

    if (viewer.mode === 'remote') {
      window.open(remoteViewerUrl(tracePath), '_blank');
      viewed(btn);
      return;
    }

    fetch('/api/show-trace?path=' + encodeURIComponent(tracePath))
      .then(function (r) { return r.json(); })
      .then(function (data) {
        if (data.success) {
          if (data.viewerUrl) { window.open(data.viewerUrl, '_blank'); }
          viewed(btn);
        } else {
          failed(btn, original, 'Could not open trace: ' + data.error);
        }
      })
      .catch(function (err) { failed(btn, original, 'Error: ' + err.message); });
  }

  document.querySelectorAll('.trace-link').forEach(function (btn) {
    btn.addEventListener('click', function (e) {
      e.stopPropagation();
      openTrace(btn);
    });
  });
})();
"#;
