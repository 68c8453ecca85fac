//! The single HTML view: an upload form, plus either a message or a result.

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::models::PredictionView;

#[derive(Debug, Default)]
pub struct PageView {
    pub message: Option<String>,
    pub result: Option<PredictionView>,
}

impl PageView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn message(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            result: None,
        }
    }

    pub fn result(result: PredictionView) -> Self {
        Self {
            message: None,
            result: Some(result),
        }
    }
}

const HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Potato Leaf Disease Detection</title>
<style>
body { font-family: sans-serif; max-width: 42rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
.message { background: #fdecea; border: 1px solid #f5c2c0; padding: .75rem; border-radius: 4px; }
.result img { max-width: 100%; border-radius: 4px; }
.confidence { font-weight: bold; }
</style>
</head>
<body>
<h1>Potato Leaf Disease Detection</h1>
"#;

const TAIL: &str = "</body>\n</html>\n";

pub fn render_page(view: &PageView, allowed_extensions: &[String]) -> String {
    let accept = allowed_extensions
        .iter()
        .map(|e| format!(".{}", e))
        .collect::<Vec<_>>()
        .join(",");

    let mut html = String::from(HEAD);
    html.push_str(&format!(
        "<form method=\"post\" action=\"/\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" accept=\"{}\">\n\
         <button type=\"submit\">Predict</button>\n\
         </form>\n",
        encode_double_quoted_attribute(&accept)
    ));

    if let Some(message) = &view.message {
        html.push_str("<p class=\"message\">");
        html.push_str(&encode_text(message));
        html.push_str("</p>\n");
    }

    if let Some(result) = &view.result {
        html.push_str(&format!(
            "<section class=\"result\">\n\
             <img src=\"{}\" alt=\"Uploaded leaf\">\n\
             <h2>{}</h2>\n\
             <p class=\"confidence\">Confidence: {:.2}%</p>\n\
             <h3>Description</h3>\n<p>{}</p>\n\
             <h3>Treatment</h3>\n<p>{}</p>\n\
             </section>\n",
            encode_double_quoted_attribute(&result.image_path),
            encode_text(&result.report.name),
            result.prediction.confidence,
            encode_text(&result.report.description),
            encode_text(&result.report.treatment),
        ));
    }

    html.push_str(TAIL);
    html
}
