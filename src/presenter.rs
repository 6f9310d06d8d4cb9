//! Web page listing the running sandboxes
//!
//! ## Endpoints
//!
//! GET / - HTML page with one link per running sandbox
//! GET /health - Presenter status
//! GET /api/sandboxes - Running sandboxes as JSON

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::config::Config;
use crate::errors::{FleetError, Result};
use crate::roster::Roster;

/// One running sandbox as shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxEntry {
    pub username: String,
    pub display_name: String,
    pub port: u16,
    pub url: String,
}

/// Everything the presenter serves, fixed when it starts
#[derive(Debug, Clone, Serialize)]
pub struct PresenterState {
    pub title: String,
    pub server_address: String,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub sandboxes: Vec<SandboxEntry>,
}

impl PresenterState {
    /// Snapshot of the rows that currently have a port
    pub fn from_roster(roster: &Roster, config: &Config) -> Self {
        let server_address = config.launch.server_address.clone();
        let sandboxes = roster
            .users
            .iter()
            .filter_map(|user| {
                let port = user.port?;
                let full_name = format!("{} {}", user.name.trim(), user.surname.trim());
                let display_name = match full_name.trim() {
                    "" => user.username.clone(),
                    name => name.to_string(),
                };
                Some(SandboxEntry {
                    username: user.username.clone(),
                    display_name,
                    port,
                    url: sandbox_url(&server_address, port),
                })
            })
            .collect();

        Self {
            title: config.launch.web_title.clone(),
            server_address,
            port: config.launch.port,
            started_at: Utc::now(),
            sandboxes,
        }
    }
}

pub fn sandbox_url(server_address: &str, port: u16) -> String {
    format!("https://{}:{}/", server_address, port)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// The HTML listing
pub fn render_page(state: &PresenterState) -> String {
    let title = escape_html(&state.title);
    let mut rows = String::new();
    for entry in &state.sandboxes {
        rows.push_str(&format!(
            "      <li><a href=\"{url}\">{name}</a> <small>port {port}</small></li>\n",
            url = escape_html(&entry.url),
            name = escape_html(&entry.display_name),
            port = entry.port,
        ));
    }
    if rows.is_empty() {
        rows.push_str("      <li>No notebooks are running.</li>\n");
    }

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         \x20 <meta charset=\"utf-8\">\n\
         \x20 <title>{title}</title>\n\
         </head>\n\
         <body>\n\
         \x20 <h1>{title}</h1>\n\
         \x20 <p>Notebook server: {server}</p>\n\
         \x20 <ul>\n\
         {rows}\
         \x20 </ul>\n\
         </body>\n\
         </html>\n",
        title = title,
        server = escape_html(&state.server_address),
        rows = rows,
    )
}

async fn index(state: web::Data<PresenterState>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(render_page(&state))
}

async fn health(state: web::Data<PresenterState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "nbfleet",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "sandboxes": state.sandboxes.len(),
    }))
}

async fn list_sandboxes(state: web::Data<PresenterState>) -> impl Responder {
    HttpResponse::Ok().json(&state.sandboxes)
}

/// Register the presenter routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/api/sandboxes", web::get().to(list_sandboxes));
}

/// Serve on `0.0.0.0:<port>` until interrupted
pub fn serve(state: PresenterState) -> Result<()> {
    let port = state.port;
    let data = web::Data::new(state);
    info!(
        "Presenter listening on http://0.0.0.0:{} (Ctrl-C stops it, sandboxes keep running)",
        port
    );

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
                .bind(("0.0.0.0", port))?
                .run()
                .await
        })
        .map_err(|e| FleetError::Presenter(format!("port {}: {}", port, e)))?;

    info!("Presenter stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::UserRecord;
    use actix_web::test as actix_test;

    fn state() -> PresenterState {
        PresenterState {
            title: "Data <Science> 101".to_string(),
            server_address: "10.0.0.5".to_string(),
            port: 9000,
            started_at: Utc::now(),
            sandboxes: vec![
                SandboxEntry {
                    username: "alice".to_string(),
                    display_name: "Alice Liddell".to_string(),
                    port: 9001,
                    url: sandbox_url("10.0.0.5", 9001),
                },
                SandboxEntry {
                    username: "bob".to_string(),
                    display_name: "bob".to_string(),
                    port: 9002,
                    url: sandbox_url("10.0.0.5", 9002),
                },
            ],
        }
    }

    #[test]
    fn page_links_every_sandbox_and_escapes_title() {
        let page = render_page(&state());

        assert!(page.contains("<title>Data &lt;Science&gt; 101</title>"));
        assert!(page.contains("<a href=\"https://10.0.0.5:9001/\">Alice Liddell</a>"));
        assert!(page.contains("<a href=\"https://10.0.0.5:9002/\">bob</a>"));
        assert!(page.contains("Notebook server: 10.0.0.5"));
    }

    #[test]
    fn empty_page_says_so() {
        let mut state = state();
        state.sandboxes.clear();
        assert!(render_page(&state).contains("No notebooks are running."));
    }

    #[test]
    fn state_lists_only_rows_with_ports() {
        let mut roster = Roster::new();
        let mut alice = UserRecord::new("alice");
        alice.name = "Alice".to_string();
        alice.surname = "Liddell".to_string();
        alice.port = Some(9001);
        let idle = UserRecord::new("idle");
        let mut bob = UserRecord::new("bob");
        bob.port = Some(9003);
        roster.users = vec![alice, idle, bob];

        let config = Config::from_toml_str(
            r#"
[setup]
user_list = "students.csv"
tutorial_dir = "tutorial"
material_dir = "week01"
password_length = 8
group = "students"

[launch]
cert_file = "/etc/ssl/cert.pem"
port = 9000
server_address = "nb.example.org"
web_title = "Course"

[shutdown]
storage_dir = "collected"
"#,
        )
        .unwrap();

        let state = PresenterState::from_roster(&roster, &config);

        assert_eq!(state.title, "Course");
        assert_eq!(state.port, 9000);
        let names: Vec<_> = state.sandboxes.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice Liddell", "bob"]);
        assert_eq!(state.sandboxes[1].url, "https://nb.example.org:9003/");
    }

    #[actix_web::test]
    async fn index_serves_html() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = actix_test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("https://10.0.0.5:9002/"));
    }

    #[actix_web::test]
    async fn health_reports_sandbox_count() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let body: serde_json::Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::get().uri("/health").to_request(),
        )
        .await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sandboxes"], 2);
    }

    #[actix_web::test]
    async fn api_lists_sandboxes() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let body: serde_json::Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::get().uri("/api/sandboxes").to_request(),
        )
        .await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["username"], "alice");
        assert_eq!(entries[0]["port"], 9001);
    }
}
