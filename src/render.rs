//! Card rendering for the dashboard page.
//!
//! The engine keeps one rendered card per app and the grid preserves insert
//! order: snapshots draw in sorted order, later additions append. All
//! server-supplied text is escaped before interpolation so a hostile
//! deployment name can never become markup.

use crate::models::{AppKey, AppRecord, ConnectionInfo};
use crate::status::Banner;
use crate::stream::ConnectionStatus;
use crate::theme::Theme;

/// Escapes text for safe interpolation into HTML content and attributes
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

/// Transient button state while a scale request is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Starting,
    Stopping,
}

impl PendingAction {
    fn label(self) -> &'static str {
        match self {
            Self::Starting => "Starting...",
            Self::Stopping => "Stopping...",
        }
    }
}

fn card_dom_id(key: &AppKey) -> String {
    format!(
        "card-{}-{}",
        escape_html(&key.namespace),
        escape_html(&key.name)
    )
}

/// Renders one app card. The toggle button posts the *other* state's target,
/// so a running card offers `replicas_off` and a stopped one `replicas_on`.
pub fn render_card(record: &AppRecord, pending: Option<PendingAction>) -> String {
    let running = record.is_running();
    let (status_text, lozenge_class) = if running {
        ("Running", "lozenge-on")
    } else {
        ("Stopped", "lozenge-off")
    };

    let button = match pending {
        Some(action) => format!(
            r#"<button class="button" disabled>{}</button>"#,
            action.label()
        ),
        None => {
            let (label, class) = if running {
                ("Turn Off", "button-turn-off")
            } else {
                ("Turn On", "button-turn-on")
            };
            format!(
                concat!(
                    r#"<button class="button {class}" data-namespace="{ns}" "#,
                    r#"data-name="{name}" data-turn-on="{turn_on}">{label}</button>"#
                ),
                class = class,
                ns = escape_html(&record.namespace),
                name = escape_html(&record.name),
                turn_on = !running,
                label = label,
            )
        }
    };

    let mut header_style = String::new();
    if let Some(color) = &record.text_color {
        header_style.push_str(&format!("color: {};", escape_html(color)));
    }
    if let Some(color) = &record.background_color {
        header_style.push_str(&format!("background-color: {};", escape_html(color)));
    }

    format!(
        concat!(
            r#"<div class="card app" id="{id}">"#,
            r#"<div class="lozenge {lozenge}">{status}</div>"#,
            r#"<span class="card-header" style="{style}">{app_name}</span>"#,
            r#"<p class="card-description"><strong>Namespace:</strong> {ns}<br>"#,
            r#"<strong>Deployment:</strong> {name}</p>"#,
            r#"<p class="card-replica-info">Current replicas: {current} (will scale to {target})</p>"#,
            r#"<div class="button-group">{button}</div>"#,
            "</div>"
        ),
        id = card_dom_id(&record.key()),
        lozenge = lozenge_class,
        status = status_text,
        style = header_style,
        app_name = escape_html(record.display_name()),
        ns = escape_html(&record.namespace),
        name = escape_html(&record.name),
        current = record.replicas_current,
        target = record.toggle_target(),
        button = button,
    )
}

pub const EMPTY_STATE: &str = concat!(
    r#"<div class="card"><p class="card-description">"#,
    "No deployments found with kuyala.enabled annotation.</p></div>"
);

/// Ordered set of rendered cards keyed by app
#[derive(Default)]
pub struct CardGrid {
    order: Vec<AppKey>,
    cards: std::collections::HashMap<AppKey, String>,
}

impl CardGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.cards.clear();
    }

    /// Replaces a card in place, appending it if it is new
    pub fn upsert(&mut self, key: AppKey, html: String) {
        if self.cards.insert(key.clone(), html).is_none() {
            self.order.push(key);
        }
    }

    pub fn remove(&mut self, key: &AppKey) {
        if self.cards.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// The full grid markup, or the empty-state card when no apps are known
    pub fn to_html(&self) -> String {
        if self.order.is_empty() {
            return EMPTY_STATE.to_string();
        }

        self.order
            .iter()
            .filter_map(|key| self.cards.get(key))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything the page template needs besides the card grid
pub struct PageContext<'a> {
    pub theme: Theme,
    pub connection: &'a ConnectionStatus,
    pub server_node: Option<&'a ConnectionInfo>,
    pub banner: Option<&'a Banner>,
}

fn connection_indicator(ctx: &PageContext<'_>) -> String {
    match ctx.connection {
        ConnectionStatus::Connecting => r#"<span class="conn conn-connecting">connecting</span>"#.to_string(),
        ConnectionStatus::Connected => {
            let node = ctx
                .server_node
                .map(|info| {
                    format!(
                        "{} ({}) ",
                        escape_html(&info.server_node_name),
                        escape_html(&info.server_node_ip)
                    )
                })
                .unwrap_or_default();
            format!(r#"<span class="conn conn-connected">{node}connected</span>"#)
        }
        ConnectionStatus::Reconnecting {
            attempt,
            max_attempts,
            ..
        } => format!(
            r#"<span class="conn conn-reconnecting">reconnecting (attempt {attempt}/{max_attempts})</span>"#
        ),
        ConnectionStatus::Down => {
            r#"<span class="conn conn-down">disconnected, restart required</span>"#.to_string()
        }
    }
}

/// Renders the whole dashboard page. The page refreshes itself periodically
/// and toggle buttons post back to the local `/toggle` endpoint.
pub fn render_page(ctx: &PageContext<'_>, grid_html: &str) -> String {
    let banner_html = ctx
        .banner
        .map(|banner| {
            format!(
                r#"<div class="alert alert-{}">{}</div>"#,
                banner.severity.class(),
                escape_html(&banner.text)
            )
        })
        .unwrap_or_default();

    format!(
        concat!(
            "<!DOCTYPE html>\n",
            r#"<html data-theme="{theme}"><head><meta charset="utf-8">"#,
            r#"<meta http-equiv="refresh" content="5">"#,
            "<title>kuyala</title></head>\n",
            r#"<body><header><h1>kuyala</h1>"#,
            r#"<div id="connection-info-container">{indicator}</div>"#,
            r#"<button id="theme-toggle" data-next="{next_theme}">Switch theme</button></header>"#,
            "\n",
            r#"<div id="status-message">{banner}</div>"#,
            "\n",
            r#"<div id="appsGrid" class="grid">{grid}</div>"#,
            "\n<script>\n",
            "document.querySelectorAll('button[data-namespace]').forEach((b) => {{\n",
            "  b.addEventListener('click', async () => {{\n",
            "    b.disabled = true;\n",
            "    await fetch('/toggle', {{\n",
            "      method: 'POST',\n",
            "      headers: {{'Content-Type': 'application/json'}},\n",
            "      body: JSON.stringify({{\n",
            "        namespace: b.dataset.namespace,\n",
            "        name: b.dataset.name,\n",
            "        turnOn: b.dataset.turnOn === 'true',\n",
            "      }}),\n",
            "    }});\n",
            "    location.reload();\n",
            "  }});\n",
            "}});\n",
            "const themeToggle = document.getElementById('theme-toggle');\n",
            "themeToggle.addEventListener('click', async () => {{\n",
            "  await fetch('/theme', {{\n",
            "    method: 'POST',\n",
            "    headers: {{'Content-Type': 'application/json'}},\n",
            "    body: JSON.stringify({{theme: themeToggle.dataset.next}}),\n",
            "  }});\n",
            "  location.reload();\n",
            "}});\n",
            "</script></body></html>"
        ),
        theme = ctx.theme,
        next_theme = ctx.theme.toggled(),
        indicator = connection_indicator(ctx),
        banner = banner_html,
        grid = grid_html,
    )
}
