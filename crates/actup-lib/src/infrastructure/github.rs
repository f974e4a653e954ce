use log::{debug, error, info, warn};
use reqwest::Method;
use reqwest::blocking::Response;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LINK};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{
    Account, DirectoryError, OwnerRepo, PullRequestRecord, PullRequestRequest,
    PullRequestService, RepositoryDirectory, RepositoryRecord, TagRegistry,
};

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "actup-cli";
const ACCEPT_JSON: &str = "application/vnd.github+json";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const PER_PAGE: &str = "per_page=100";
/// Attempts per read request before giving up on it
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Errors that can occur when interacting with the Github API
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("failed to create HTTP client")]
    ClientInit(#[source] reqwest::Error),

    #[error("failed to fetch {operation} from {url}")]
    Request {
        operation: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Github API returned status {status} for {url}: {body}")]
    ApiStatus {
        status: reqwest::StatusCode,
        url: String,
        body: String,
    },

    #[error("failed to parse response from {url}")]
    ParseResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl GithubError {
    fn into_directory_error(self, operation: &'static str) -> DirectoryError {
        DirectoryError::failed(operation, self.to_string())
    }
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Github REST client for repositories, tags and pull requests.
///
/// Mutating calls are logged and skipped when `dry_run` is set.
pub struct GithubClient {
    client: reqwest::blocking::Client,
    token: String,
    dry_run: bool,
}

impl GithubClient {
    /// # Errors
    ///
    /// Returns `GithubError::ClientInit` if the HTTP client cannot be initialized.
    pub fn new(token: impl Into<String>, dry_run: bool) -> Result<Self, GithubError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(GithubError::ClientInit)?;

        Ok(Self {
            client,
            token: token.into(),
            dry_run,
        })
    }

    /// Send one request and turn any non-success status into an error carrying
    /// the response body. Reads are retried on transport errors and 5xx.
    fn execute(
        &self,
        operation: &'static str,
        method: &Method,
        url: &str,
        payload: Option<&PullRequestRequest>,
    ) -> Result<Response, GithubError> {
        let attempts = if *method == Method::GET { MAX_ATTEMPTS } else { 1 };
        let mut attempt = 1;

        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .header(ACCEPT, ACCEPT_JSON);
            if let Some(payload) = payload {
                request = request.json(payload);
            }

            let outcome = request.send();
            let retryable = match &outcome {
                Ok(response) => response.status().is_server_error(),
                Err(_) => true,
            };

            if retryable && attempt < attempts {
                warn!("{operation}: attempt {attempt} of {attempts} failed for {url}, retrying");
                thread::sleep(RETRY_BACKOFF.saturating_mul(attempt));
                attempt = attempt.saturating_add(1);
                continue;
            }

            let response = outcome.map_err(|source| GithubError::Request {
                operation,
                url: url.to_owned(),
                source,
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(GithubError::ApiStatus {
                    status,
                    url: url.to_owned(),
                    body: response.text().unwrap_or_default(),
                });
            }
            return Ok(response);
        }
    }

    fn get_json<T: DeserializeOwned>(&self, operation: &'static str, url: &str) -> Result<T, GithubError> {
        self.execute(operation, &Method::GET, url, None)?
            .json()
            .map_err(|source| GithubError::ParseResponse {
                url: url.to_owned(),
                source,
            })
    }

    /// Fetch every page of a list endpoint, following `rel="next"` links.
    ///
    /// A failure on the first page is an error. A failure on a later page is
    /// logged and the pages fetched so far are returned.
    fn get_paged<T: DeserializeOwned>(&self, operation: &'static str, first_url: &str) -> Result<Vec<T>, GithubError> {
        let mut items = Vec::new();
        let mut url = first_url.to_owned();
        let mut page = 1_u32;

        loop {
            debug!("{operation}: page {page} from {url}");
            let fetched = self.execute(operation, &Method::GET, &url, None).and_then(|response| {
                let next = parse_next_link(response.headers());
                let page_items: Vec<T> =
                    response
                        .json()
                        .map_err(|source| GithubError::ParseResponse {
                            url: url.clone(),
                            source,
                        })?;
                Ok((page_items, next))
            });

            match fetched {
                Ok((page_items, next)) => {
                    items.extend(page_items);
                    match next {
                        Some(next) => url = next,
                        None => return Ok(items),
                    }
                }
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    error!("{operation}: abandoning remaining pages: {e}");
                    return Ok(items);
                }
            }
            page = page.saturating_add(1);
        }
    }

    fn repositories_from(&self, operation: &'static str, url: &str) -> Result<Vec<RepositoryRecord>, DirectoryError> {
        self.get_paged::<RepositoryRecord>(operation, url)
            .map(|repos| repos.into_iter().map(RepositoryRecord::normalized).collect())
            .map_err(|e| e.into_directory_error(operation))
    }
}

/// Parse the `Link` header to find the `rel="next"` URL for pagination.
fn parse_next_link(headers: &HeaderMap) -> Option<String> {
    let link_header = headers.get(LINK)?.to_str().ok()?;
    link_header
        .split(',')
        .map(str::trim)
        .find(|part| part.ends_with("rel=\"next\""))
        .and_then(|part| {
            let (_, after_open) = part.split_once('<')?;
            let (url, _) = after_open.split_once('>')?;
            Some(url.to_owned())
        })
}

impl TagRegistry for GithubClient {
    fn tags(&self, owner_repo: &OwnerRepo) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{GITHUB_API_BASE}/repos/{owner_repo}/tags?{PER_PAGE}");
        self.get_paged::<TagEntry>("tags", &url)
            .map(|tags| tags.into_iter().map(|tag| tag.name).collect())
            .map_err(|e| e.into_directory_error("tags"))
    }
}

impl RepositoryDirectory for GithubClient {
    fn repositories(&self, account: &Account) -> Result<Vec<RepositoryRecord>, DirectoryError> {
        let url = format!("{GITHUB_API_BASE}/{}/repos?{PER_PAGE}", account.entity_path());
        self.repositories_from("repositories", &url)
    }

    fn team_repositories(
        &self,
        account: &Account,
        team: &str,
    ) -> Result<Vec<RepositoryRecord>, DirectoryError> {
        let url = format!(
            "{GITHUB_API_BASE}/orgs/{}/teams/{team}/repos?{PER_PAGE}",
            account.login
        );
        self.repositories_from("team repositories", &url)
    }

    fn repository(&self, account: &Account, name: &str) -> Result<RepositoryRecord, DirectoryError> {
        let url = format!("{GITHUB_API_BASE}/repos/{}/{name}", account.login);
        self.get_json::<RepositoryRecord>("repository", &url)
            .map(RepositoryRecord::normalized)
            .map_err(|e| e.into_directory_error("repository"))
    }
}

impl PullRequestService for GithubClient {
    fn open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequestRecord>, DirectoryError> {
        let url = format!("{GITHUB_API_BASE}/repos/{owner}/{repo}/pulls?state=open&{PER_PAGE}");
        self.get_paged("pull requests", &url)
            .map_err(|e| e.into_directory_error("pull requests"))
    }

    fn create_pull_request(&self, owner: &str, repo: &str, request: &PullRequestRequest) -> Result<(), DirectoryError> {
        if self.dry_run {
            info!(
                "Dry run: not creating pull request in {owner}/{repo}: {} -> {}",
                request.head, request.base
            );
            return Ok(());
        }

        let url = format!("{GITHUB_API_BASE}/repos/{owner}/{repo}/pulls");
        self.execute("create pull request", &Method::POST, &url, Some(request))
            .map(|_| ())
            .map_err(|e| e.into_directory_error("create pull request"))
    }

    fn update_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        request: &PullRequestRequest,
    ) -> Result<(), DirectoryError> {
        if self.dry_run {
            info!("Dry run: not updating pull request #{number} in {owner}/{repo}");
            return Ok(());
        }

        let url = format!("{GITHUB_API_BASE}/repos/{owner}/{repo}/pulls/{number}");
        self.execute("update pull request", &Method::PATCH, &url, Some(request))
            .map(|_| ())
            .map_err(|e| e.into_directory_error("update pull request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn link_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(LINK, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn next_link_is_found_among_relations() {
        let headers = link_headers(
            "<https://api.github.com/orgs/acme/repos?page=1>; rel=\"prev\", \
             <https://api.github.com/orgs/acme/repos?page=3>; rel=\"next\", \
             <https://api.github.com/orgs/acme/repos?page=9>; rel=\"last\"",
        );
        assert_eq!(
            parse_next_link(&headers).as_deref(),
            Some("https://api.github.com/orgs/acme/repos?page=3")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let headers = link_headers("<https://api.github.com/orgs/acme/repos?page=1>; rel=\"first\"");
        assert_eq!(parse_next_link(&headers), None);
        assert_eq!(parse_next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn dry_run_skips_pull_request_mutations() {
        let client = GithubClient::new("token", true).unwrap();
        let request = PullRequestRequest {
            title: "Updated 1 github actions.".to_owned(),
            body: "body".to_owned(),
            head: "actup-20240105".to_owned(),
            base: "main".to_owned(),
        };

        assert!(client.create_pull_request("acme", "api", &request).is_ok());
        assert!(client.update_pull_request("acme", "api", 3, &request).is_ok());
    }
}
