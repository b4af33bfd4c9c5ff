//! Server-rendered HTML. Self-contained pages, no external resources.

use crate::config::APP_NAME;

const STYLE: &str = r#"
    body { font-family: Arial, sans-serif; background:#1e1e1e; color:#fff; margin:0; padding:40px; }
    h1 { color:#f39c12; }
    .grid { display:flex; gap:24px; align-items:flex-start; }
    .card { background:#2c2c2c; border-radius:12px; padding:16px; box-shadow:0 4px 10px rgba(0,0,0,0.5); }
    img { max-width:400px; height:auto; border-radius:8px; display:block; }
    a.button, button { display:inline-block; margin-top:16px; padding:10px 16px; background:#f39c12; color:#1e1e1e; text-decoration:none; border:none; border-radius:6px; font-weight:bold; font-size:14px; cursor:pointer; }
    a.button:hover, button:hover { background:#d35400; }
    .notice { color:#bbb; font-size:14px; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>{STYLE}</style>
</head>
<body>
{body}
</body>
</html>
"#
    )
}

/// Upload form. Posts `multipart/form-data` with a single `file` field to `/`.
pub fn index_page(passthrough: bool) -> String {
    let notice = if passthrough {
        r#"
  <p class="notice">No model is loaded: the generated image will be a copy of your upload.</p>"#
    } else {
        ""
    };

    let body = format!(
        r#"  <h1>Facial Sketch Synthesis</h1>
  <div class="card">
    <h3>Upload a sketch</h3>
    <form method="post" action="/" enctype="multipart/form-data">
      <input type="file" name="file" accept="image/*" required>
      <br>
      <button type="submit">Generate Face</button>
    </form>{notice}
  </div>
  <p class="notice">{APP_NAME} v{version}</p>"#,
        version = crate::config::APP_VERSION,
    );
    layout("Facial Sketch Synthesis", &body)
}

/// Input and generated image side by side, with a download link.
pub fn result_page(filename: &str) -> String {
    let f = escape_html(filename);
    let body = format!(
        r#"  <h1>Facial Sketch Synthesis - Result</h1>
  <div class="grid">
    <div class="card">
      <h3>Input Sketch</h3>
      <img src="/uploads/{f}" alt="input">
    </div>
    <div class="card">
      <h3>Generated Face</h3>
      <img src="/outputs/{f}" alt="output">
      <a class="button" href="/outputs/{f}" download>Download Generated Image</a>
    </div>
  </div>
  <p><a class="button" href="/">← Try another image</a></p>"#
    );
    layout("Result - Facial Sketch Synthesis", &body)
}

pub fn error_page(heading: &str, message: &str) -> String {
    let body = format!(
        r#"  <h1>{heading}</h1>
  <p>{message}</p>
  <p><a class="button" href="/">← Try another image</a></p>"#,
        heading = escape_html(heading),
        message = escape_html(message),
    );
    layout(&format!("{} - Facial Sketch Synthesis", escape_html(heading)), &body)
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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
