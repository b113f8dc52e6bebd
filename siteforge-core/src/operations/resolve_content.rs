use crate::error::Result;
use crate::package::normalize_page_name;
use crate::store::DocumentStore;
use std::sync::Arc;

/// Map a file extension to the content type the serving path responds with.
pub fn content_type_for(filename: &str) -> &'static str {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct ResolveContentRequest {
    /// Subdomain portion of the request host.
    pub subdomain: String,
    /// Request path relative to the site root.
    pub path: String,
}

#[derive(Debug, Clone)]
pub enum ResolveContentOutcome {
    Found {
        content: String,
        content_type: &'static str,
    },
    SiteNotFound,
    PageNotFound,
}

/// Read path: resolve (subdomain, path) through the deployment record to
/// the stored page content. Consumes what the reconciler wrote; never
/// touches a provider.
#[derive(Clone)]
pub struct ResolveContentOperation {
    store: Arc<dyn DocumentStore>,
}

impl ResolveContentOperation {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, request: ResolveContentRequest) -> Result<ResolveContentOutcome> {
        let subdomain = request.subdomain.to_lowercase();

        let Some(deployment) = self.store.find_deployment_by_subdomain(&subdomain).await? else {
            return Ok(ResolveContentOutcome::SiteNotFound);
        };

        let pages = self.store.list_pages(&deployment.project_id).await?;

        let mut filename = request.path.trim_matches('/').to_string();
        if filename.is_empty() || filename == "index" {
            filename = "index.html".to_string();
        }

        let lookup = |name: &str| {
            pages
                .iter()
                .find(|page| normalize_page_name(&page.name) == name)
                .cloned()
        };

        let mut page = lookup(&filename);
        // extensionless requests retry with .html, the way stored page
        // names are written
        if page.is_none() && !filename.contains('.') {
            page = lookup(&format!("{}.html", filename));
        }

        match page {
            Some(page) => Ok(ResolveContentOutcome::Found {
                content_type: content_type_for(&filename),
                content: page.content,
            }),
            None => Ok(ResolveContentOutcome::PageNotFound),
        }
    }
}
