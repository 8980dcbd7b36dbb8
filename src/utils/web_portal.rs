use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use secrecy::ExposeSecret;
use url::Url;
use urlencoding::encode;

use crate::config::PortalConfig;
use crate::error::FetchError;
use crate::utils::portal::{ChildRef, PortalClient, PortalSession, RawGrade};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BONUS_TAG: &str = "(bonus)";

// Talks to the school portal over HTTP, keeping the login cookie between
// requests. Endpoints are resolved against the configured portal URL.
#[derive(Debug, Default)]
pub struct WebPortal;

pub struct WebSession {
    client: Client,
    base: Url,
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::upstream(format!("invalid selector {css}: {e:?}")))
}

fn endpoint(base: &Url, path: &str) -> Result<Url, FetchError> {
    base.join(path)
        .map_err(|e| FetchError::upstream_with(format!("cannot build portal URL for {path}"), e))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl PortalClient for WebPortal {
    async fn authenticate(&self, portal: &PortalConfig) -> Result<Box<dyn PortalSession>, FetchError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::upstream_with("Failed to build the client", e))?;

        let login_url = endpoint(&portal.url, "login")?;
        let login_data = [
            ("login", portal.username.as_str()),
            ("password", portal.password.expose_secret().as_str()),
        ];

        let response = client
            .post(login_url)
            .form(&login_data)
            .send()
            .await
            .map_err(|e| FetchError::upstream_with("Failed to send login request", e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Authentication(format!(
                    "portal answered {}, check URL, username and password",
                    response.status()
                )));
            }
            status if !status.is_success() => {
                return Err(FetchError::upstream(format!("login request failed with status {status}")));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::upstream_with("Failed to read login response", e))?;
        if is_login_page(&body)? {
            return Err(FetchError::Authentication(
                "the portal showed the login form again, check username and password".into(),
            ));
        }

        info!("Logged into the portal as {}", portal.username);
        Ok(Box::new(WebSession {
            client,
            base: portal.url.clone(),
        }))
    }
}

impl WebSession {
    async fn get_page(&self, path: &str) -> Result<String, FetchError> {
        let url = endpoint(&self.base, path)?;
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::upstream_with(format!("Failed to request {path}"), e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Authentication(format!("session refused on {path} ({status})")));
        }
        if !status.is_success() {
            return Err(FetchError::upstream(format!("{path} answered with status {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::upstream_with(format!("Failed to read {path}"), e))
    }
}

#[async_trait]
impl PortalSession for WebSession {
    async fn list_children(&mut self) -> Result<Vec<ChildRef>, FetchError> {
        let html = self.get_page("enfants").await?;
        parse_children(&html)
    }

    async fn grades_for(&mut self, child: &ChildRef) -> Result<Vec<RawGrade>, FetchError> {
        let html = self.get_page(&format!("notes?enfant={}", encode(&child.id))).await?;
        parse_grades(&html)
    }

    async fn close(&mut self) {
        let url = match endpoint(&self.base, "logout") {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not close the portal session: {e}");
                return;
            }
        };
        match self.client.post(url).send().await {
            Ok(response) if response.status().is_success() => info!("Portal session closed"),
            Ok(response) => warn!("Portal logout answered with status {}", response.status()),
            Err(e) => warn!("Could not close the portal session: {e}"),
        }
    }
}

// True when the page still carries the login form, which is how the portal
// answers a wrong password.
pub fn is_login_page(html: &str) -> Result<bool, FetchError> {
    let form = selector("form#login")?;
    Ok(Html::parse_document(html).select(&form).next().is_some())
}

// Extracts the children listed on the account page.
pub fn parse_children(html: &str) -> Result<Vec<ChildRef>, FetchError> {
    let child_selector = selector("[data-child-id]")?;
    let document = Html::parse_document(html);

    let children: Vec<ChildRef> = document
        .select(&child_selector)
        .filter_map(|el| {
            let id = el.value().attr("data-child-id")?.trim().to_string();
            let name = text_of(el);
            if id.is_empty() || name.is_empty() {
                warn!("Skipping a child entry without id or name");
                return None;
            }
            Some(ChildRef { id, name })
        })
        .collect();
    Ok(children)
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?P<value>[^/]+?)\s*/\s*(?P<max>[^/]+?)\s*$").expect("score pattern is valid")
    })
}

// Splits a score cell such as "14/20", "Abs" or "15,5/20*" into value, scale
// and bonus marker.
pub fn split_score(cell: &str) -> (Option<String>, Option<String>, bool) {
    let mut cell = cell.trim();
    let mut is_bonus = false;
    if let Some(stripped) = cell.strip_suffix('*') {
        cell = stripped.trim_end();
        is_bonus = true;
    } else if let Some(cut) = cell.len().checked_sub(BONUS_TAG.len()) {
        if cell.is_char_boundary(cut) && cell[cut..].eq_ignore_ascii_case(BONUS_TAG) {
            cell = cell[..cut].trim_end();
            is_bonus = true;
        }
    }

    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    match score_pattern().captures(cell) {
        Some(caps) => (
            non_empty(&caps["value"]),
            non_empty(&caps["max"]),
            is_bonus,
        ),
        None => (non_empty(cell), None, is_bonus),
    }
}

// Reads the grade table of one child. Rows with fewer than three cells are
// layout rows and are ignored.
pub fn parse_grades(html: &str) -> Result<Vec<RawGrade>, FetchError> {
    let row_selector = selector("table.notes tr")?;
    let cell_selector = selector("td")?;
    let document = Html::parse_document(html);

    let mut grades = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(text_of).collect();
        if cells.len() < 3 {
            continue;
        }
        let (grade, out_of, is_bonus) = split_score(&cells[2]);
        let cell = |i: usize| cells.get(i).cloned().filter(|c| !c.is_empty());

        grades.push(RawGrade {
            date: cell(0),
            subject: cell(1),
            grade,
            out_of,
            coefficient: cell(3),
            comment: cell(4),
            is_bonus,
        });
    }
    Ok(grades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::portal::tests::child;
    use secrecy::Secret;

    const CHILDREN_PAGE: &str = r#"
        <html><body>
          <ul class="enfants">
            <li data-child-id="42"> Alice
                 MARTIN </li>
            <li data-child-id="43">Bob MARTIN</li>
            <li data-child-id="">ghost</li>
          </ul>
        </body></html>"#;

    const GRADES_PAGE: &str = r#"
        <html><body>
          <table class="notes">
            <tr><th>Date</th><th>Matière</th><th>Note</th><th>Coef</th><th>Commentaire</th></tr>
            <tr>
              <td>01/03/2024</td><td>Mathématiques</td><td>14/20</td><td>2</td><td>Contrôle</td>
            </tr>
            <tr>
              <td></td><td>Anglais</td><td>Abs</td><td>1</td><td></td>
            </tr>
            <tr><td>05/03/2024</td><td>EPS</td><td>18 / 20 *</td></tr>
          </table>
        </body></html>"#;

    fn config_for(server: &mockito::Server) -> PortalConfig {
        PortalConfig {
            url: format!("{}/pronote/", server.url()).parse().unwrap(),
            username: "parent".into(),
            password: Secret::new("p@ss word".into()),
        }
    }

    #[test]
    fn children_are_read_from_data_attributes() {
        let children = parse_children(CHILDREN_PAGE).unwrap();
        assert_eq!(children, vec![child("42", "Alice MARTIN"), child("43", "Bob MARTIN")]);
    }

    #[test]
    fn grade_rows_are_read_with_missing_cells() {
        let grades = parse_grades(GRADES_PAGE).unwrap();
        assert_eq!(grades.len(), 3);

        assert_eq!(grades[0].date.as_deref(), Some("01/03/2024"));
        assert_eq!(grades[0].subject.as_deref(), Some("Mathématiques"));
        assert_eq!(grades[0].grade.as_deref(), Some("14"));
        assert_eq!(grades[0].out_of.as_deref(), Some("20"));
        assert_eq!(grades[0].coefficient.as_deref(), Some("2"));
        assert_eq!(grades[0].comment.as_deref(), Some("Contrôle"));

        assert_eq!(grades[1].date, None);
        assert_eq!(grades[1].grade.as_deref(), Some("Abs"));
        assert_eq!(grades[1].out_of, None);
        assert_eq!(grades[1].comment, None);

        assert!(grades[2].is_bonus);
        assert_eq!(grades[2].grade.as_deref(), Some("18"));
        assert_eq!(grades[2].coefficient, None);
    }

    #[test]
    fn score_cells() {
        assert_eq!(split_score("15,5/20"), (Some("15,5".into()), Some("20".into()), false));
        assert_eq!(split_score("N.Not"), (Some("N.Not".into()), None, false));
        assert_eq!(split_score("12/20 (Bonus)"), (Some("12".into()), Some("20".into()), true));
        assert_eq!(split_score("  "), (None, None, false));
    }

    #[tokio::test]
    async fn full_session_against_a_portal() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/pronote/login")
            .match_body(mockito::Matcher::UrlEncoded("password".into(), "p@ss word".into()))
            .with_status(200)
            .with_header("set-cookie", "SESSION=abc; Path=/")
            .with_body("<html><body>Bienvenue</body></html>")
            .create_async()
            .await;
        let children = server
            .mock("GET", "/pronote/enfants")
            .with_status(200)
            .with_body(CHILDREN_PAGE)
            .create_async()
            .await;
        let grades = server
            .mock("GET", "/pronote/notes")
            .match_query(mockito::Matcher::UrlEncoded("enfant".into(), "42".into()))
            .with_status(200)
            .with_body(GRADES_PAGE)
            .create_async()
            .await;
        let logout = server
            .mock("POST", "/pronote/logout")
            .with_status(200)
            .create_async()
            .await;

        let mut session = WebPortal.authenticate(&config_for(&server)).await.unwrap();
        let listed = session.list_children().await.unwrap();
        let fetched = session.grades_for(&listed[0]).await.unwrap();
        session.close().await;

        assert_eq!(listed.len(), 2);
        assert_eq!(fetched.len(), 3);
        login.assert_async().await;
        children.assert_async().await;
        grades.assert_async().await;
        logout.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_login_is_an_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/pronote/login")
            .with_status(401)
            .create_async()
            .await;

        let err = WebPortal.authenticate(&config_for(&server)).await.err().unwrap();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[tokio::test]
    async fn login_form_shown_again_is_an_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/pronote/login")
            .with_status(200)
            .with_body(r#"<form id="login"><input name="login"></form>"#)
            .create_async()
            .await;

        let err = WebPortal.authenticate(&config_for(&server)).await.err().unwrap();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[tokio::test]
    async fn portal_outage_is_upstream_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/pronote/login")
            .with_status(503)
            .create_async()
            .await;

        let err = WebPortal.authenticate(&config_for(&server)).await.err().unwrap();
        assert!(matches!(err, FetchError::UpstreamUnavailable { .. }));
    }
}
