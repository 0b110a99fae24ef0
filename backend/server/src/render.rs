//! # Roster Page
//!
//! Server-rendered form, one row per slot.
//!
//! ## Row
//! - `memberName{i}`: text input, disabled until loaded
//! - `minusButton{i}` / `plusButton{i}` around the `count{i}` display
//! - `confirmResetButton{i}`, swapped for `resetButton{i}` + `cancelResetButton{i}` while confirming
//! - `unsynced{i}`: badge shown while the slot's latest write is pending or failed
//!
//! A trailing `confirmAllResetButton` swaps for `allResetButton` + `cancelAllResetButton`.
//!
//! Both halves of every reset toggle are rendered; the script flips `hidden`
//! from the view returned by each event.
use roster::{ResetState, RosterView, SlotView};
use uuid::Uuid;

use crate::utils::escape_html;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    /// Anything other than `dark` is light.
    pub fn from_query(theme: Option<&str>) -> Self {
        match theme {
            Some("dark") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    fn input(self) -> &'static str {
        match self {
            Theme::Light => "",
            Theme::Dark => "bg-secondary text-light member",
        }
    }

    fn neutral(self) -> &'static str {
        match self {
            Theme::Light => "btn-outline-dark",
            Theme::Dark => "btn-secondary",
        }
    }

    fn danger(self) -> &'static str {
        match self {
            Theme::Light => "btn-outline-danger",
            Theme::Dark => "btn-danger",
        }
    }
}

const SCRIPT: &str = r#"
const page = document.body.dataset.page;
const theme = document.body.dataset.theme;
let seq = 0;
let queue = Promise.resolve();
let gone = false;

function update(view) {
  for (const slot of view.slots) {
    document.getElementById(`count${slot.index}`).textContent = slot.likes;
    document.getElementById(`resetIdle${slot.index}`).hidden = slot.reset !== "idle";
    document.getElementById(`resetConfirm${slot.index}`).hidden = slot.reset !== "confirming";
    document.getElementById(`unsynced${slot.index}`).hidden = !slot.unsynced;
  }
  document.getElementById("allResetIdle").hidden = view.roster_reset !== "idle";
  document.getElementById("allResetConfirm").hidden = view.roster_reset !== "confirming";
}

async function send(event) {
  if (gone) return;
  const response = await fetch(`/edit/${page}/events`, {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify(event),
  });
  if (response.ok) {
    update(await response.json());
  } else if (response.status === 401 || response.status === 404) {
    // Page pruned or session lapsed, start over from the stored roster.
    gone = true;
    window.location.assign(`/edit?theme=${theme}`);
  }
}

// One request in flight at a time, numbered in the order the user acted.
function enqueue(event) {
  seq += 1;
  const numbered = { ...event, seq };
  queue = queue.then(() => send(numbered)).catch((e) => console.error(e));
}

document.addEventListener("click", (e) => {
  const button = e.target.closest("button[data-op]");
  if (!button) return;
  const slot = button.dataset.slot;
  enqueue(slot === undefined ? { op: button.dataset.op } : { op: button.dataset.op, slot: Number(slot) });
});

document.addEventListener("input", (e) => {
  const input = e.target;
  if (input.dataset.op !== "rename") return;
  enqueue({ op: "rename", slot: Number(input.dataset.slot), name: input.value });
});

window.addEventListener("pagehide", () => navigator.sendBeacon(`/edit/${page}/close`));
"#;

const SPINNER: &str = r#"<div class="align-middle spinner-border spinner-border-sm" role="status"><span class="visually-hidden">Loading...</span></div>"#;

fn hidden(visible: bool) -> &'static str {
    if visible { "" } else { " hidden" }
}

fn render_slot(html: &mut String, slot: &SlotView, loaded: bool, theme: Theme) {
    let i = slot.index;
    let n = i + 1;
    let disabled = if loaded { "" } else { " disabled" };
    let placeholder = if loaded {
        format!("Enter the name of member {n}")
    } else {
        "Loading...".to_string()
    };
    let count = match slot.likes {
        Some(likes) => likes.to_string(),
        None => SPINNER.to_string(),
    };
    let confirming = slot.reset == ResetState::Confirming;
    let (neutral, danger) = (theme.neutral(), theme.danger());

    html.push_str(&format!(
        r#"<div data-row="{i}">
<div class="container mt-3">
<div class="mb-3">
<label for="memberName{i}" class="form-label">Member {n}</label>
<input class="form-control {input}" type="text" id="memberName{i}" tabindex="{n}" value="{name}" placeholder="{placeholder}" data-op="rename" data-slot="{i}"{disabled}>
</div>
<div class="row">
<div class="col">
<button type="button" class="btn {neutral}" id="minusButton{i}" data-op="decrement" data-slot="{i}"{disabled}>－</button>
<span class="ms-3 me-3" id="count{i}">{count}</span>
<button type="button" class="btn {neutral}" id="plusButton{i}" data-op="increment" data-slot="{i}"{disabled}>＋</button>
<span class="badge text-bg-warning ms-2" id="unsynced{i}"{unsynced}>unsynced</span>
</div>
<div class="col text-end">
<div id="resetConfirm{i}"{show_confirm}>
<button type="button" class="btn {danger} me-3" id="resetButton{i}" data-op="reset" data-slot="{i}"><i class="bi bi-check-lg"></i></button>
<button type="button" class="btn {neutral}" id="cancelResetButton{i}" data-op="cancel_reset" data-slot="{i}"><i class="bi bi-x-lg"></i></button>
</div>
<div id="resetIdle{i}"{show_idle}>
<button type="button" class="btn {danger}" id="confirmResetButton{i}" data-op="confirm_reset" data-slot="{i}"{disabled}>Reset</button>
</div>
</div>
</div>
</div>
<hr>
</div>
"#,
        input = theme.input(),
        name = escape_html(&slot.name),
        unsynced = hidden(slot.unsynced),
        show_confirm = hidden(confirming),
        show_idle = hidden(!confirming),
    ));
}

pub fn render_page(page: Uuid, view: &RosterView, theme: Theme) -> String {
    let mut html = String::new();
    let body_class = match theme {
        Theme::Light => "",
        Theme::Dark => "bg-dark text-light",
    };

    html.push_str(&format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Roster</title>
<link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css">
<link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/bootstrap-icons@1.11.3/font/bootstrap-icons.min.css">
</head>
<body class="{body_class}" data-page="{page}" data-theme="{theme}">
"#,
        theme = theme.as_str(),
    ));

    for slot in &view.slots {
        render_slot(&mut html, slot, view.loaded, theme);
    }

    let confirming = view.roster_reset == ResetState::Confirming;
    let disabled = if view.loaded { "" } else { " disabled" };
    html.push_str(&format!(
        r#"<div class="container mt-3 mb-5 text-end">
<div id="allResetConfirm"{show_confirm}>
<button type="button" class="btn {danger} me-3" id="allResetButton" data-op="reset_all"><i class="bi bi-check-lg"></i></button>
<button type="button" class="btn {neutral}" id="cancelAllResetButton" data-op="cancel_reset_all"><i class="bi bi-x-lg"></i></button>
</div>
<div id="allResetIdle"{show_idle}>
<button type="button" class="btn {danger}" id="confirmAllResetButton" data-op="confirm_reset_all"{disabled}>Reset all</button>
</div>
</div>
<script>{SCRIPT}</script>
</body>
</html>
"#,
        danger = theme.danger(),
        neutral = theme.neutral(),
        show_confirm = hidden(confirming),
        show_idle = hidden(!confirming),
    ));

    html
}

#[cfg(test)]
mod tests {
    use roster::{LocalRosterState, SLOT_COUNT};

    use super::*;

    fn loading_view() -> RosterView {
        RosterView::new(&LocalRosterState::Loading, |_| false)
    }

    #[test]
    fn test_theme_from_query() {
        assert_eq!(Theme::from_query(Some("dark")), Theme::Dark);
        assert_eq!(Theme::from_query(Some("light")), Theme::Light);
        assert_eq!(Theme::from_query(Some("neon")), Theme::Light);
        assert_eq!(Theme::from_query(None), Theme::Light);
    }

    #[test]
    fn test_every_row_is_rendered() {
        let html = render_page(Uuid::nil(), &loading_view(), Theme::Light);

        for i in 0..SLOT_COUNT {
            assert!(html.contains(&format!(r#"id="memberName{i}""#)));
            assert!(html.contains(&format!(r#"id="count{i}""#)));
            assert!(html.contains(&format!(r#"id="confirmResetButton{i}""#)));
        }
        assert!(html.contains(r#"id="confirmAllResetButton""#));
        assert!(html.contains(&format!(r#"data-page="{}""#, Uuid::nil())));
    }

    #[test]
    fn test_loading_disables_inputs() {
        let html = render_page(Uuid::nil(), &loading_view(), Theme::Light);

        assert!(html.contains(r#"data-slot="0" disabled>"#));
        assert!(html.contains("spinner-border"));
        assert!(html.contains(r#"placeholder="Loading...""#));
    }

    #[test]
    fn test_loaded_row() {
        let mut view = loading_view();
        view.loaded = true;
        view.slots[5].name = "<Alice & co>".to_string();
        view.slots[5].likes = Some(3);
        view.slots[5].reset = ResetState::Confirming;

        let html = render_page(Uuid::nil(), &view, Theme::Light);

        assert!(html.contains(r#"value="&lt;Alice &amp; co&gt;""#));
        assert!(html.contains(r#"<span class="ms-3 me-3" id="count5">3</span>"#));
        assert!(html.contains(r#"<div id="resetConfirm5">"#));
        assert!(html.contains(r#"<div id="resetIdle5" hidden>"#));
        assert!(html.contains(r#"<div id="resetConfirm4" hidden>"#));
    }

    #[test]
    fn test_script_orders_events() {
        let html = render_page(Uuid::nil(), &loading_view(), Theme::Dark);

        assert!(html.contains("queue = queue.then(() => send(numbered))"));
        assert!(html.contains("{ ...event, seq }"));
        assert!(html.contains("response.status === 401 || response.status === 404"));
        assert!(html.contains("/edit?theme=${theme}"));
    }

    #[test]
    fn test_dark_theme_classes() {
        let html = render_page(Uuid::nil(), &loading_view(), Theme::Dark);

        assert!(html.contains("bg-secondary text-light"));
        assert!(html.contains("btn-danger"));
        assert!(!html.contains("btn-outline-dark"));
        assert!(html.contains(r#"data-theme="dark""#));
    }
}
