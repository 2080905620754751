//! Workspace picker page

use std::collections::BTreeMap;
use std::fmt::Write;

use sso_settings::WorkspaceCredential;

/// Escape text for use inside HTML element content or a quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = "body{margin:0;font-family:Arial,Helvetica,sans-serif}\
.container{display:flex;min-height:100vh;align-items:center;justify-content:center}\
form{text-align:center;background:#fff;padding:1rem 2rem}\
select{padding:.3rem;cursor:pointer}\
button{background-color:#3E5BC7;padding:5px 12px;color:#fff;cursor:pointer;font-weight:bold;border:0}\
.notice{color:#b32d2e}";

/// Render the picker listing every registered workspace.
///
/// `preselected` marks the previously bound workspace; `unavailable` names a
/// workspace whose sign-in just failed before reaching the provider.
pub fn render(
    workspaces: &BTreeMap<String, WorkspaceCredential>,
    preselected: Option<&str>,
    unavailable: Option<&str>,
) -> String {
    let mut options = String::new();
    let placeholder = if preselected.is_some_and(|p| workspaces.contains_key(p)) {
        ""
    } else {
        " selected"
    };
    let _ = write!(
        options,
        "<option value=\"\" disabled{placeholder}>Select one</option>"
    );
    for (domain, workspace) in workspaces {
        let selected = if preselected == Some(domain.as_str()) {
            " selected"
        } else {
            ""
        };
        let label = if workspace.name.is_empty() || workspace.name == *domain {
            escape_attr(domain)
        } else {
            format!("{} ({})", escape_attr(&workspace.name), escape_attr(domain))
        };
        let _ = write!(
            options,
            "<option value=\"{}\"{selected}>{label}</option>",
            escape_attr(domain)
        );
    }

    let notice = unavailable
        .map(|domain| {
            format!(
                "<p class=\"notice\">Sign-in for {} is unavailable right now.</p>",
                escape_attr(domain)
            )
        })
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
<title>Sign in</title><style>{STYLE}</style></head>\
<body><div class=\"container\"><form method=\"get\" action=\"/login\">{notice}\
<p><label for=\"workspace\">Log in with your Google workspace domain:</label></p>\
<select id=\"workspace\" name=\"workspace\">{options}</select> \
<button type=\"submit\">Log in with Google</button></form></div></body></html>"
    )
}
