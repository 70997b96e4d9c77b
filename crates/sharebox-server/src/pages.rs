//! Server-rendered HTML pages.
//!
//! Every dynamic value is passed through [`escape`]; file names and usernames
//! are user supplied.

use axum::response::Html;
use sharebox_store::FileRecord;

use crate::auth::SessionUser;

/// Values shared by every page: site title and who is signed in.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub instance_name: &'a str,
    pub user: Option<&'a SessionUser>,
}

/// Escape text for use in HTML element content and quoted attributes.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(ctx: &PageContext<'_>, title: &str, body: &str) -> Html<String> {
    let site = escape(ctx.instance_name);
    let nav = match ctx.user {
        Some(user) => format!(
            r#"<span>Logged in as <strong>{}</strong></span> <a href="/dashboard">Dashboard</a> <a href="/logout">Logout</a>"#,
            escape(&user.username)
        ),
        None => r#"<a href="/login">Login</a> <a href="/signup">Sign up</a>"#.to_string(),
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title} - {site}</title>
</head>
<body>
<header><a href="/">{site}</a> <nav>{nav}</nav></header>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape(title),
    ))
}

fn error_banner(error: Option<&str>) -> String {
    error
        .map(|msg| format!(r#"<p class="error">{}</p>"#, escape(msg)))
        .unwrap_or_default()
}

fn credentials_form(action: &str, submit: &str) -> String {
    format!(
        r#"<form method="post" action="{action}">
<label>Username <input type="text" name="username" required></label>
<label>Password <input type="password" name="password" required></label>
<button type="submit">{submit}</button>
</form>"#
    )
}

pub fn landing(ctx: &PageContext<'_>) -> Html<String> {
    let body = format!(
        r#"<h1>Welcome to {}</h1>
<p>Upload files and share them with a link.</p>
<p><a href="/signup">Create an account</a> or <a href="/login">log in</a>.</p>"#,
        escape(ctx.instance_name)
    );
    layout(ctx, "Home", &body)
}

pub fn signup(ctx: &PageContext<'_>, error: Option<&str>) -> Html<String> {
    let body = format!(
        "<h1>Sign up</h1>\n{}\n{}\n<p>Already registered? <a href=\"/login\">Log in</a>.</p>",
        error_banner(error),
        credentials_form("/signup", "Sign up"),
    );
    layout(ctx, "Sign up", &body)
}

pub fn login(ctx: &PageContext<'_>, error: Option<&str>) -> Html<String> {
    let body = format!(
        "<h1>Log in</h1>\n{}\n{}\n<p>No account yet? <a href=\"/signup\">Sign up</a>.</p>",
        error_banner(error),
        credentials_form("/login", "Log in"),
    );
    layout(ctx, "Log in", &body)
}

pub fn dashboard(ctx: &PageContext<'_>, files: &[FileRecord]) -> Html<String> {
    let listing = if files.is_empty() {
        "<p>No files uploaded yet.</p>".to_string()
    } else {
        let rows: String = files
            .iter()
            .map(|file| {
                format!(
                    r#"<li><a href="/file/{id}">{name}</a> <time>{at}</time></li>"#,
                    id = file.id,
                    name = escape(&file.original_name),
                    at = file.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("<ul class=\"files\">\n{rows}\n</ul>")
    };

    let body = format!(
        r#"<h1>Your files</h1>
<form method="post" action="/upload" enctype="multipart/form-data">
<input type="file" name="file" required>
<button type="submit">Upload</button>
</form>
{listing}"#
    );
    layout(ctx, "Dashboard", &body)
}

pub fn upload_success(ctx: &PageContext<'_>, link: &str) -> Html<String> {
    let link = escape(link);
    let body = format!(
        r#"<h1>Upload complete</h1>
<p>Share this link:</p>
<p><a class="share-link" href="{link}">{link}</a></p>
<p><a href="/dashboard">Back to dashboard</a></p>"#
    );
    layout(ctx, "Uploaded", &body)
}

pub fn file(ctx: &PageContext<'_>, record: &FileRecord) -> Html<String> {
    let name = escape(&record.original_name);
    let body = format!(
        r#"<h1>{name}</h1>
<p>Uploaded <time>{at}</time></p>
<p><a href="/download/{id}">Download</a></p>"#,
        at = record.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
        id = record.id,
    );
    layout(ctx, &record.original_name, &body)
}
