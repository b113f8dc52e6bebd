use crate::error::{ForgeError, Result};
use crate::hash::{HashSpec, content_hash};
use crate::model::{Page, Project};
use bytes::Bytes;
use std::collections::BTreeMap;

pub const INDEX_PAGE: &str = "index.html";

/// One addressable file inside a deployment package.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteFile {
    /// Relative path with no leading slash.
    pub path: String,
    pub content: Bytes,
}

/// The ephemeral, provider-agnostic file set built fresh for each
/// deployment attempt. Lives only in memory and dies with the attempt.
#[derive(Debug, Clone)]
pub struct SitePackage {
    files: Vec<SiteFile>,
}

impl SitePackage {
    pub fn files(&self) -> &[SiteFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&SiteFile> {
        self.files.iter().find(|file| file.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Hash manifest for content-addressed providers: relative path to hex
    /// digest under the provider's hash spec.
    pub fn manifest(&self, spec: HashSpec) -> Result<BTreeMap<String, String>> {
        let mut manifest = BTreeMap::new();
        for file in &self.files {
            manifest.insert(file.path.clone(), content_hash(spec, &file.content)?);
        }
        Ok(manifest)
    }
}

/// Assembles a project's pages into a [`SitePackage`].
#[derive(Debug, Default)]
pub struct PackageBuilder;

impl PackageBuilder {
    /// Build the package for one deployment attempt.
    ///
    /// A project with zero pages still yields a servable placeholder; a
    /// package missing `index.html` gets the first HTML file aliased to it;
    /// any empty file fails the whole package before a single remote call.
    pub fn build(project: &Project, pages: &[Page]) -> Result<SitePackage> {
        let mut files: Vec<SiteFile> = Vec::with_capacity(pages.len().max(1));

        for page in pages {
            let path = normalize_page_name(&page.name);
            if path.is_empty() {
                return Err(ForgeError::Validation(format!(
                    "page name '{}' normalizes to an empty path",
                    page.name
                )));
            }
            if files.iter().any(|file| file.path == path) {
                return Err(ForgeError::Validation(format!(
                    "duplicate page path '{}' in project {}",
                    path, project.id
                )));
            }
            files.push(SiteFile {
                path,
                content: Bytes::from(page.content.clone().into_bytes()),
            });
        }

        if files.is_empty() {
            tracing::info!(
                "project {} has no pages; packaging generated placeholder",
                project.id
            );
            files.push(SiteFile {
                path: INDEX_PAGE.to_string(),
                content: Bytes::from(placeholder_index(&project.name).into_bytes()),
            });
        }

        if !files.iter().any(|file| file.path == INDEX_PAGE) {
            if let Some(first_html) = files
                .iter()
                .find(|file| file.path.ends_with(".html"))
                .cloned()
            {
                tracing::debug!(
                    "project {} has no index.html; aliasing {}",
                    project.id,
                    first_html.path
                );
                files.push(SiteFile {
                    path: INDEX_PAGE.to_string(),
                    content: first_html.content,
                });
            } else {
                files.push(SiteFile {
                    path: INDEX_PAGE.to_string(),
                    content: Bytes::from(placeholder_index(&project.name).into_bytes()),
                });
            }
        }

        for file in &files {
            if file.content.is_empty() {
                return Err(ForgeError::Validation(format!(
                    "file '{}' has empty content",
                    file.path
                )));
            }
        }

        Ok(SitePackage { files })
    }
}

/// Canonicalize a stored page name into a relative serving path.
pub fn normalize_page_name(name: &str) -> String {
    name.trim().trim_start_matches('/').to_string()
}

fn placeholder_index(project_name: &str) -> String {
    let title = if project_name.trim().is_empty() {
        "My Website"
    } else {
        project_name.trim()
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
  <style>
    * {{ margin: 0; padding: 0; box-sizing: border-box; }}
    body {{ font-family: sans-serif; min-height: 100vh; display: flex; align-items: center; justify-content: center; }}
    .container {{ text-align: center; max-width: 600px; padding: 20px; }}
    h1 {{ font-size: 3em; margin-bottom: 20px; }}
    p {{ font-size: 1.2em; margin-bottom: 30px; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>{title}</h1>
    <p>Your website is live. Start building by adding pages in the editor.</p>
  </div>
</body>
</html>"#
    )
}
