use axum::routing::MethodFilter;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension every method artifact carries: `get.route`, `post.route`, ...
pub const ROUTE_ARTIFACT_EXT: &str = "route";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RouteMethod {
    pub const ALL: [RouteMethod; 4] = [
        RouteMethod::Get,
        RouteMethod::Post,
        RouteMethod::Put,
        RouteMethod::Delete,
    ];

    /// Operation name used for grants.
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Delete => "DELETE",
        }
    }

    /// Recognize a method artifact name, case-insensitively.
    pub fn from_artifact(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if !ext.eq_ignore_ascii_case(ROUTE_ARTIFACT_EXT) {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(stem))
    }

    pub fn method_filter(self) -> MethodFilter {
        match self {
            RouteMethod::Get => MethodFilter::GET,
            RouteMethod::Post => MethodFilter::POST,
            RouteMethod::Put => MethodFilter::PUT,
            RouteMethod::Delete => MethodFilter::DELETE,
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered route and the artifact that declared it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteDescriptor {
    pub path: String,
    pub method: RouteMethod,
    /// `<dir>/get.route`; a directory when the route carries access or validation artifacts.
    pub artifact: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("failed to list route root '{}': {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Walk `root` and collect every `(path, method)` it declares.
///
/// A missing root yields no routes. Entries are visited in name order, so the
/// result is stable for an unchanged tree. Subdirectories that cannot be listed are skipped.
pub fn discover(root: &Path) -> Result<Vec<RouteDescriptor>, DiscoverError> {
    let mut out = Vec::new();
    match sorted_entries(root) {
        Ok(entries) => walk(entries, "", &mut out),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(root = %root.display(), "route root is absent");
        }
        Err(source) => {
            return Err(DiscoverError::Root {
                path: root.to_path_buf(),
                source,
            })
        }
    }
    Ok(out)
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                entries.push((name.to_string(), entry.path()));
            }
        }
    }
    entries.sort();
    Ok(entries)
}

fn walk(entries: Vec<(String, PathBuf)>, url_path: &str, out: &mut Vec<RouteDescriptor>) {
    for (name, path) in entries {
        if let Some(method) = RouteMethod::from_artifact(&name) {
            out.push(RouteDescriptor {
                path: if url_path.is_empty() {
                    "/".to_string()
                } else {
                    url_path.to_string()
                },
                method,
                artifact: path,
            });
        } else if path.is_dir() {
            let nested = format!("{url_path}/{name}");
            match sorted_entries(&path) {
                Ok(children) => walk(children, &nested, out),
                Err(e) => {
                    tracing::warn!(dir = %path.display(), error = %e, "skipping unreadable route directory")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, "").unwrap();
    }

    fn pairs(routes: &[RouteDescriptor]) -> HashSet<(String, RouteMethod)> {
        routes.iter().map(|r| (r.path.clone(), r.method)).collect()
    }

    #[test]
    fn artifact_names() {
        assert_eq!(RouteMethod::from_artifact("get.route"), Some(RouteMethod::Get));
        assert_eq!(RouteMethod::from_artifact("DELETE.Route"), Some(RouteMethod::Delete));
        assert_eq!(RouteMethod::from_artifact("get.js"), None);
        assert_eq!(RouteMethod::from_artifact("patch.route"), None);
        assert_eq!(RouteMethod::from_artifact("route"), None);
    }

    #[test]
    fn collects_routes_by_convention() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "get.route");
        touch(tmp.path(), "news/get.route/validator.yaml");
        touch(tmp.path(), "news/add/post.route/validator.yaml");
        touch(tmp.path(), "news/delete/delete.route/access.yaml");
        touch(tmp.path(), "news/README.md");

        let routes = discover(tmp.path()).unwrap();

        let expected: HashSet<_> = [
            ("/".to_string(), RouteMethod::Get),
            ("/news".to_string(), RouteMethod::Get),
            ("/news/add".to_string(), RouteMethod::Post),
            ("/news/delete".to_string(), RouteMethod::Delete),
        ]
        .into_iter()
        .collect();
        assert_eq!(pairs(&routes), expected);

        let news = routes
            .iter()
            .find(|r| r.path == "/news" && r.method == RouteMethod::Get)
            .unwrap();
        assert!(news.artifact.is_dir());
    }

    #[test]
    fn missing_root_yields_no_routes() {
        let tmp = tempdir().unwrap();
        assert!(discover(&tmp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn discover_is_idempotent() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "a/get.route");
        touch(tmp.path(), "a/b/put.route");

        let first = discover(tmp.path()).unwrap();
        let second = discover(tmp.path()).unwrap();
        assert_eq!(pairs(&first), pairs(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn root_that_is_a_file_is_an_error() {
        let tmp = tempdir().unwrap();
        touch(tmp.path(), "routes");
        assert!(discover(&tmp.path().join("routes")).is_err());
    }
}
