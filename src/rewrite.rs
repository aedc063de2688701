//! Manifest rewriting for delivery through the relay.
//!
//! Two edits are made: the MPD base URL is pointed at the CDN directory the
//! stream was resolved to, so relative segment URLs load from the CDN, and
//! adaptation sets of excluded content types are removed.
//!
//! Subtitle (`text`) sets are excluded by default because the target player
//! integration cannot render them. They are not encrypted, so this is a
//! player limitation and not a protection measure.
use tracing::debug;
use url::{Position, Url};

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::utils::{parent_directory, repair_scheme_separator};

/// Rewrites manifests in place.
#[derive(Debug, Clone)]
pub struct ManifestRewriter {
    excluded_content_types: Vec<String>,
}

impl Default for ManifestRewriter {
    fn default() -> Self {
        Self::new(vec!["text".to_string()])
    }
}

impl ManifestRewriter {
    /// Rewriter removing adaptation sets whose `contentType` is exactly one of
    /// `excluded_content_types` (case-sensitive).
    pub fn new(excluded_content_types: Vec<String>) -> Self {
        Self {
            excluded_content_types,
        }
    }

    /// Point `manifest` at the directory of `stream_url` and drop excluded
    /// adaptation sets.
    ///
    /// On [`Error::InvalidUrl`] the manifest is left untouched.
    pub fn rewrite(&self, manifest: &mut Manifest, stream_url: &str) -> Result<()> {
        let base_url = base_url_for(stream_url)?;
        manifest.base_url = Some(base_url);

        let removed = self.strip_excluded(manifest);
        debug!(
            "Rewrote manifest base to {}, removed {} adaptation set(s)",
            manifest.base_url.as_deref().unwrap_or_default(),
            removed
        );
        Ok(())
    }

    /// Empty every slot holding an excluded content type. Returns how many
    /// slots were emptied. Slot positions never change.
    pub fn strip_excluded(&self, manifest: &mut Manifest) -> usize {
        let mut removed = 0;
        for period in &mut manifest.periods {
            for slot in &mut period.adaptation_sets {
                let excluded = slot
                    .as_ref()
                    .and_then(|set| set.content_type())
                    .is_some_and(|ty| self.excluded_content_types.iter().any(|ex| ex == ty));
                if excluded {
                    *slot = None;
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// CDN directory of `stream_url`, with a trailing `/`.
///
/// The last path segment, query and fragment are dropped. Applying this to
/// its own output returns the same value.
pub fn base_url_for(stream_url: &str) -> Result<String> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: stream_url.to_string(),
        reason,
    };

    let url = Url::parse(stream_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.has_host() {
        return Err(invalid("missing host".to_string()));
    }

    let directory = format!("{}/", parent_directory(&url[..Position::AfterPath]));
    let base_url = repair_scheme_separator(&directory).into_owned();

    Url::parse(&base_url).map_err(|e| invalid(format!("derived base url {}: {}", base_url, e)))?;
    Ok(base_url)
}

#[cfg(test)]
mod tests {
    use super::{base_url_for, ManifestRewriter};
    use crate::error::Error;
    use crate::manifest::{AdaptationSet, Element, Manifest, Period};

    fn set(content_type: &str) -> Option<AdaptationSet> {
        Some(AdaptationSet {
            element: Element::new("AdaptationSet").with_attribute("contentType", content_type),
        })
    }

    fn manifest_with(periods: Vec<Vec<Option<AdaptationSet>>>) -> Manifest {
        Manifest {
            name: "MPD".to_string(),
            attributes: Vec::new(),
            base_url: None,
            base_url_attributes: Vec::new(),
            leading: Vec::new(),
            periods: periods
                .into_iter()
                .enumerate()
                .map(|(i, sets)| Period {
                    name: "Period".to_string(),
                    attributes: vec![("id".to_string(), i.to_string())],
                    leading: Vec::new(),
                    adaptation_sets: sets,
                    trailing: Vec::new(),
                })
                .collect(),
            trailing: Vec::new(),
        }
    }

    #[test]
    fn base_url_is_parent_directory() {
        assert_eq!(
            base_url_for("https://cdn.example.com/a/b/manifest.mpd").expect("base url"),
            "https://cdn.example.com/a/b/"
        );
        assert_eq!(
            base_url_for("https://cdn.x.tv/p1/stream.mpd?token=abc#t=10").expect("base url"),
            "https://cdn.x.tv/p1/"
        );
        assert_eq!(
            base_url_for("http://cdn.example.com:8080/stream.mpd").expect("base url"),
            "http://cdn.example.com:8080/"
        );
    }

    #[test]
    fn base_url_is_a_fixed_point() {
        let once = base_url_for("https://cdn.example.com/a/b/manifest.mpd").expect("base url");
        let twice = base_url_for(&once).expect("base url");
        assert_eq!(once, twice);
        assert!(!twice.contains(":///"));
    }

    #[test]
    fn embedded_scheme_in_path_is_untouched() {
        assert_eq!(
            base_url_for("https://cdn.example.com/proxy/https:/origin/stream.mpd")
                .expect("base url"),
            "https://cdn.example.com/proxy/https:/origin/"
        );
    }

    #[test]
    fn invalid_stream_urls() {
        for url in ["stream.mpd", "/a/b/stream.mpd", "ftp://cdn.example.com/a.mpd", ""] {
            let err = base_url_for(url).expect_err(url);
            assert!(matches!(err, Error::InvalidUrl { .. }), "{}", url);
        }
    }

    #[test]
    fn text_slots_are_emptied_in_place() {
        let mut manifest = manifest_with(vec![vec![set("video"), set("text"), set("audio")]]);
        ManifestRewriter::default()
            .rewrite(&mut manifest, "https://cdn.example.com/a/b/manifest.mpd")
            .expect("rewrite");

        assert_eq!(
            manifest.base_url.as_deref(),
            Some("https://cdn.example.com/a/b/")
        );
        let period = &manifest.periods[0];
        assert_eq!(period.adaptation_sets.len(), 3);
        assert_eq!(period.content_types(), vec![Some("video"), None, Some("audio")]);
        assert!(period.adaptation_sets[1].is_none());
    }

    #[test]
    fn filter_is_exact_and_covers_all_periods() {
        let mut manifest = manifest_with(vec![
            vec![set("text"), set("Text"), None, set("subtitle")],
            vec![set("audio"), set("text")],
        ]);
        let removed = ManifestRewriter::default().strip_excluded(&mut manifest);

        assert_eq!(removed, 2);
        assert_eq!(
            manifest.periods[0].content_types(),
            vec![None, Some("Text"), None, Some("subtitle")]
        );
        assert_eq!(manifest.periods[1].content_types(), vec![Some("audio"), None]);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut manifest = manifest_with(vec![vec![set("video"), set("text")]]);
        let rewriter = ManifestRewriter::default();
        let url = "https://cdn.example.com/a/b/manifest.mpd";

        rewriter.rewrite(&mut manifest, url).expect("first rewrite");
        let first = manifest.clone();
        rewriter.rewrite(&mut manifest, url).expect("second rewrite");
        assert_eq!(manifest, first);
    }

    #[test]
    fn invalid_url_leaves_manifest_untouched() {
        let mut manifest = manifest_with(vec![vec![set("text")]]);
        let before = manifest.clone();
        let err = ManifestRewriter::default()
            .rewrite(&mut manifest, "not a url")
            .expect_err("should fail");
        assert!(matches!(err, Error::InvalidUrl { .. }));
        assert_eq!(manifest, before);
    }

    #[test]
    fn custom_exclusions() {
        let mut manifest = manifest_with(vec![vec![set("video"), set("image"), set("text")]]);
        let rewriter = ManifestRewriter::new(vec!["image".to_string()]);
        assert_eq!(rewriter.strip_excluded(&mut manifest), 1);
        assert_eq!(
            manifest.periods[0].content_types(),
            vec![Some("video"), None, Some("text")]
        );
    }
}
