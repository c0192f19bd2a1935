//! HTML templates for the login and message pages.
//!
//! Plain server-side rendering: every interpolated value goes through
//! [`html_escape`].

use crate::identity::Provider;

/// Shared CSS for all pages.
const SHARED_STYLES: &str = r#"
* {
    margin: 0;
    padding: 0;
    box-sizing: border-box;
}

body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #f4f5f9;
    min-height: 100vh;
    display: flex;
    justify-content: center;
    align-items: center;
    color: #1c1f40;
    line-height: 1.5;
}

.container {
    width: 100%;
    max-width: 420px;
    padding: 1rem;
}

.card {
    background: #ffffff;
    border: 1px solid #e3e5ee;
    border-radius: 12px;
    padding: 2rem;
}

.card-title {
    font-size: 1.25rem;
    font-weight: 600;
    margin-bottom: 1.5rem;
    text-align: center;
}

.message {
    text-align: center;
    font-size: 1rem;
}

.form-group {
    margin-bottom: 1rem;
}

.form-group label {
    display: block;
    font-size: 0.875rem;
    margin-bottom: 0.25rem;
    color: #6c757d;
}

.form-group input {
    width: 100%;
    padding: 0.5rem 0.75rem;
    border: 1px solid #ced4da;
    border-radius: 6px;
    font-size: 0.95rem;
}

.btn {
    display: block;
    width: 100%;
    padding: 0.75rem;
    margin-top: 0.75rem;
    border: none;
    border-radius: 6px;
    font-size: 1rem;
    font-weight: 500;
    cursor: pointer;
    color: #ffffff;
    background: #3b3fe3;
}

.btn-google {
    background: #db4437;
}

.audience {
    text-align: center;
    font-size: 0.875rem;
    color: #6c757d;
    margin-bottom: 1rem;
}
"#;

fn html_page(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + SHARED_STYLES.len() + 512);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str("</title>\n    <style>");
    html.push_str(SHARED_STYLES);
    html.push_str("</style>\n</head>\n<body>\n    <div class=\"container\">\n");
    html.push_str(content);
    html.push_str("\n    </div>\n</body>\n</html>");
    html
}

/// Renders the general page showing a single message.
pub fn render_message_page(message: &str) -> String {
    let mut content = String::with_capacity(256);
    content.push_str("<div class=\"card\">\n<p class=\"message\">");
    content.push_str(&html_escape(message));
    content.push_str("</p>\n</div>");
    html_page("Sign in", &content)
}

/// Values carried by the login form into `POST /authorize`.
#[derive(Debug, Clone, Default)]
pub struct LoginForm<'a> {
    pub code: Option<&'a str>,
    pub audience: &'a str,
    pub redirect: Option<&'a str>,
}

/// Renders the login page with one button per provider.
///
/// The Microsoft button comes with an optional tenant field.
pub fn render_login_page(form: &LoginForm<'_>, providers: &[Provider]) -> String {
    let mut content = String::with_capacity(2048);

    content.push_str("<div class=\"card\">\n");
    content.push_str("<div class=\"card-title\">Sign in</div>\n");
    content.push_str("<div class=\"audience\">Organisation: ");
    content.push_str(&html_escape(&form.audience.to_uppercase()));
    content.push_str("</div>\n");
    content.push_str("<form method=\"POST\" action=\"/authorize\">\n");

    push_hidden(&mut content, "audience", form.audience);
    if let Some(code) = form.code {
        push_hidden(&mut content, "code", code);
    }
    if let Some(redirect) = form.redirect {
        push_hidden(&mut content, "redirect", redirect);
    }

    if providers.contains(&Provider::Microsoft) {
        content.push_str("<div class=\"form-group\">\n");
        content.push_str("<label for=\"tenant\">Microsoft tenant (optional)</label>\n");
        content.push_str(
            "<input type=\"text\" id=\"tenant\" name=\"tenant\" placeholder=\"contoso.onmicrosoft.com\">\n",
        );
        content.push_str("</div>\n");
    }

    for provider in providers.iter().filter(|p| p.is_federated()) {
        let (class, label) = match provider {
            Provider::Google => ("btn btn-google", "Sign in with Google"),
            _ => ("btn", "Sign in with Microsoft"),
        };
        content.push_str("<button type=\"submit\" name=\"provider\" value=\"");
        content.push_str(provider.as_str());
        content.push_str("\" class=\"");
        content.push_str(class);
        content.push_str("\">");
        content.push_str(label);
        content.push_str("</button>\n");
    }

    content.push_str("</form>\n</div>");
    html_page("Sign in", &content)
}

fn push_hidden(content: &mut String, name: &str, value: &str) {
    content.push_str("<input type=\"hidden\" name=\"");
    content.push_str(name);
    content.push_str("\" value=\"");
    content.push_str(&html_escape(value));
    content.push_str("\">\n");
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
