use std::path::Path;

use common::{parent_relpath, ItemId, ItemType, LibraryItem};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::index::{item_at, item_at_mut};
use crate::LibraryError;

/// User-maintained mapping document, re-read on every rebuild.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MappingDocument {
    pub aliases: Vec<AliasSpec>,
    pub changes: Vec<ChangeSpec>,
    pub collections: Vec<CollectionSpec>,
}

/// How a mapping entry names its target. `path` wins over `collection`,
/// which wins over `season`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TargetRef {
    pub path: Option<String>,
    pub collection: Option<String>,
    /// `"show\tseason"`
    pub season: Option<String>,
}

impl TargetRef {
    fn describe(&self) -> String {
        if let Some(path) = &self.path {
            format!("path {:?}", path)
        } else if let Some(name) = &self.collection {
            format!("collection {:?}", name)
        } else if let Some(season) = &self.season {
            format!("season {:?}", season.replace('\t', " / "))
        } else {
            "empty reference".to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AliasSpec {
    #[serde(flatten)]
    pub target: TargetRef,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ItemType>,
    pub poster: Option<String>,
    pub hide_original: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangeSpec {
    #[serde(flatten)]
    pub target: TargetRef,
    #[serde(rename = "type")]
    pub kind: Option<ItemType>,
    pub title: Option<String>,
    pub hide: Option<bool>,
    pub poster: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<ItemType>,
    pub alt_names: Vec<String>,
    pub poster: Option<String>,
    pub aliases: Vec<AliasSpec>,
}

/// Reads the mapping document; a missing file is an empty mapping.
pub async fn load_mapping(path: &Path) -> Result<MappingDocument, LibraryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MappingDocument::default()),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasReport {
    pub aliases: usize,
    pub changes: usize,
    pub collections: usize,
    pub unresolved: Vec<String>,
}

/// Id of the n-th synthetic collection (1-based).
pub fn collection_id(n: usize) -> ItemId {
    ItemId::new(-(n as f64) / 1000.0)
}

/// Applies changes, aliases and collections to a merged tree.
pub fn resolve_aliases(
    items: &mut Vec<LibraryItem>,
    mapping: &MappingDocument,
    config: &SyncConfig,
) -> AliasReport {
    let mut report = AliasReport::default();

    for change in &mapping.changes {
        let Some(path) = find_target(items, &change.target, config) else {
            unresolved(&mut report, &change.target);
            continue;
        };
        if let Some(item) = item_at_mut(items, &path) {
            apply_change(item, change);
            report.changes += 1;
        }
    }

    let mut added = Vec::new();
    let mut hidden = Vec::new();
    for spec in &mapping.aliases {
        let Some(path) = find_target(items, &spec.target, config) else {
            unresolved(&mut report, &spec.target);
            continue;
        };
        let Some(original) = item_at(items, &path) else {
            continue;
        };
        let mut alias = make_alias(original, spec);
        alias.collection_id = Some(ItemId::ALIAS_ONLY);
        added.push(alias);
        if spec.hide_original {
            hidden.push(path);
        }
        report.aliases += 1;
    }

    for (n, spec) in mapping.collections.iter().enumerate() {
        let id = collection_id(n + 1);
        let mut collection = LibraryItem::new(
            id,
            spec.kind.unwrap_or(ItemType::Collection),
            spec.name.clone(),
        );
        collection.title = Some(spec.name.clone());
        collection.poster_path = spec.poster.clone();
        let mut members = Vec::new();
        for member in &spec.aliases {
            let Some(path) = find_target(items, &member.target, config) else {
                unresolved(&mut report, &member.target);
                continue;
            };
            let Some(original) = item_at(items, &path) else {
                continue;
            };
            let mut alias = make_alias(original, member);
            alias.collection_id = Some(id);
            alias.parent_id = Some(id);
            members.push(alias);
            if member.hide_original {
                hidden.push(path);
            }
        }
        collection.data = Some(members);

        for alt in &spec.alt_names {
            let mut copy = collection.clone();
            copy.original_name = Some(collection.name.clone());
            copy.name = alt.clone();
            copy.title = Some(alt.clone());
            copy.is_alias = Some(true);
            copy.is_link = Some(true);
            copy.collection_id = Some(ItemId::ALIAS_ONLY);
            added.push(copy);
        }
        added.push(collection);
        report.collections += 1;
    }

    for path in hidden {
        if let Some(item) = item_at_mut(items, &path) {
            item.hide = Some(true);
        }
    }
    items.extend(added);

    if !report.unresolved.is_empty() {
        info!(
            "Mapping applied with {} unresolved references",
            report.unresolved.len()
        );
    }
    report
}

fn unresolved(report: &mut AliasReport, target: &TargetRef) {
    let description = target.describe();
    warn!("Mapping target not found: {}", description);
    report.unresolved.push(description);
}

/// Independent copy of `original` presented under the alias settings.
fn make_alias(original: &LibraryItem, spec: &AliasSpec) -> LibraryItem {
    let mut alias = original.clone();
    alias.is_alias = Some(true);
    alias.is_link = Some(true);
    alias.hide = None;
    alias.original_name = Some(original.name.clone());
    if let Some(name) = &spec.name {
        alias.name = name.clone();
        alias.title = Some(name.clone());
    }
    if let Some(kind) = spec.kind {
        alias.kind = kind;
    }
    if let Some(poster) = &spec.poster {
        alias.alias_poster_path = Some(poster.clone());
    }
    alias
}

fn apply_change(item: &mut LibraryItem, change: &ChangeSpec) {
    if let Some(kind) = change.kind {
        item.kind = kind;
    }
    if let Some(title) = &change.title {
        item.title = Some(title.clone());
    }
    if let Some(hide) = change.hide {
        item.hide = hide.then_some(true);
    }
    if let Some(poster) = &change.poster {
        item.poster_path = Some(poster.clone());
    }
    if let Some(year) = change.year {
        item.year = Some(year);
    }
}

fn find_target(items: &[LibraryItem], target: &TargetRef, config: &SyncConfig) -> Option<Vec<usize>> {
    if let Some(path) = &target.path {
        return find_by_path(items, path.trim_matches('/'), config);
    }
    if let Some(name) = &target.collection {
        return find_by_name(items, name);
    }
    if let Some(season) = &target.season {
        let (show, season) = season.split_once('\t')?;
        return find_season(items, show.trim(), season.trim());
    }
    None
}

fn canonical_nodes(items: &[LibraryItem]) -> Vec<(Vec<usize>, &LibraryItem)> {
    fn walk<'a>(
        items: &'a [LibraryItem],
        path: &mut Vec<usize>,
        out: &mut Vec<(Vec<usize>, &'a LibraryItem)>,
    ) {
        for (idx, item) in items.iter().enumerate() {
            if item.is_alias() || item.is_alias_only() || item.id.is_fractional() {
                continue;
            }
            path.push(idx);
            out.push((path.clone(), item));
            walk(item.children(), path, out);
            path.pop();
        }
    }
    let mut out = Vec::new();
    walk(items, &mut Vec::new(), &mut out);
    out
}

/// Exact uri match first; otherwise a node whose uri lies directly in the
/// target directory. A file match resolves to its parent node.
fn find_by_path(items: &[LibraryItem], target: &str, config: &SyncConfig) -> Option<Vec<usize>> {
    let nodes = canonical_nodes(items);
    let relpath = |item: &LibraryItem| {
        item.uri
            .as_deref()
            .map(|uri| config.relpath_of(uri).trim_end_matches('/').to_string())
    };

    let exact = nodes
        .iter()
        .find(|(_, item)| item.kind != ItemType::Extra && relpath(item).as_deref() == Some(target));
    let (path, item) = match exact {
        Some(found) => found,
        None => nodes.iter().find(|(_, item)| {
            item.kind != ItemType::Extra
                && relpath(item)
                    .map(|rel| parent_relpath(&rel) == target)
                    .unwrap_or(false)
        })?,
    };
    if item.kind == ItemType::File && path.len() > 1 {
        return Some(path[..path.len() - 1].to_vec());
    }
    Some(path.clone())
}

fn find_by_name(items: &[LibraryItem], name: &str) -> Option<Vec<usize>> {
    canonical_nodes(items)
        .into_iter()
        .filter(|(_, item)| item.kind.is_container())
        .find(|(_, item)| item.name == name || item.title.as_deref() == Some(name))
        .map(|(path, _)| path)
}

fn find_season(items: &[LibraryItem], show: &str, season: &str) -> Option<Vec<usize>> {
    canonical_nodes(items)
        .into_iter()
        .filter(|(_, item)| item.kind == ItemType::TvShow)
        .filter(|(_, item)| item.name == show || item.title.as_deref() == Some(show))
        .find_map(|(path, item)| {
            let idx = item.children().iter().position(|child| {
                child.kind == ItemType::TvSeason
                    && (child.name == season || child.title.as_deref() == Some(season))
            })?;
            let mut found = path;
            found.push(idx);
            Some(found)
        })
}

/// Removes alias copies and synthetic collections and clears hide flags,
/// leaving the tree as it was before mapping resolution.
pub fn strip_non_canonical(items: &mut Vec<LibraryItem>) {
    items.retain(|item| !item.is_alias() && !item.is_alias_only() && !item.id.is_fractional());
    for item in items.iter_mut() {
        item.hide = None;
        if let Some(children) = item.data.as_mut() {
            strip_non_canonical(children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig {
            provider_root: "/videos".to_string(),
            ..SyncConfig::default()
        }
    }

    fn file(id: i64, uri: &str) -> LibraryItem {
        let mut item = LibraryItem::new(ItemId::from(id), ItemType::File, common::file_name(uri));
        item.uri = Some(uri.to_string());
        item
    }

    fn base_tree() -> Vec<LibraryItem> {
        let mut episode = LibraryItem::new(ItemId::from(3), ItemType::TvEpisode, "Pilot");
        episode.data = Some(vec![file(4, "/videos/Show/Season 1/Show - S01E01.mkv")]);
        let mut season = LibraryItem::new(ItemId::from(2), ItemType::TvSeason, "Season 1");
        season.uri = Some("/videos/Show/Season 1".to_string());
        season.data = Some(vec![episode]);
        let mut show = LibraryItem::new(ItemId::from(1), ItemType::TvShow, "Show");
        show.uri = Some("/videos/Show".to_string());
        show.data = Some(vec![season]);

        let mut movie = LibraryItem::new(ItemId::from(10), ItemType::Movie, "Heat");
        movie.data = Some(vec![file(11, "/videos/Movies/Heat/Heat (1995).mkv")]);
        vec![show, movie]
    }

    fn mapping(value: serde_json::Value) -> MappingDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn path_alias_adds_one_top_level_copy() {
        let mut items = base_tree();
        let before = items.clone();
        let report = resolve_aliases(
            &mut items,
            &mapping(json!({"aliases": [{"path": "Show/Season 1", "name": "Alt Name"}]})),
            &config(),
        );
        assert_eq!(report.aliases, 1);
        assert_eq!(items.len(), 3);
        assert_eq!(&items[..2], &before[..]);

        let alias = &items[2];
        assert_eq!(alias.is_alias, Some(true));
        assert_eq!(alias.is_link, Some(true));
        assert_eq!(alias.name, "Alt Name");
        assert_eq!(alias.original_name.as_deref(), Some("Season 1"));
        assert_eq!(alias.id, ItemId::from(2));
        assert_eq!(alias.collection_id, Some(ItemId::ALIAS_ONLY));
        assert_eq!(alias.data, before[0].children()[0].data);
    }

    #[test]
    fn hide_original_flags_the_source_only() {
        let mut items = base_tree();
        resolve_aliases(
            &mut items,
            &mapping(json!({"aliases": [{"collection": "Heat", "name": "Heat (Alt)", "hideOriginal": true}]})),
            &config(),
        );
        assert_eq!(items[1].hide, Some(true));
        assert_eq!(items[1].name, "Heat");
        assert_eq!(items[2].hide, None);
        assert_eq!(items[2].name, "Heat (Alt)");
    }

    #[test]
    fn loose_path_match_resolves_file_to_its_parent() {
        let mut items = base_tree();
        let report = resolve_aliases(
            &mut items,
            &mapping(json!({"aliases": [{"path": "/Movies/Heat/", "type": "Collection"}]})),
            &config(),
        );
        assert!(report.unresolved.is_empty());
        assert_eq!(items[2].id, ItemId::from(10));
        assert_eq!(items[2].kind, ItemType::Collection);
        assert_eq!(items[1].kind, ItemType::Movie);
    }

    #[test]
    fn collections_get_fractional_ids_and_alt_name_copies() {
        let mut items = base_tree();
        let report = resolve_aliases(
            &mut items,
            &mapping(json!({"collections": [
                {"name": "Crime", "aliases": [{"collection": "Heat"}]},
                {"name": "Shows", "altNames": ["Series"], "poster": "shows.jpg",
                 "aliases": [{"season": "Show\tSeason 1"}, {"path": "Nope"}]}
            ]})),
            &config(),
        );
        assert_eq!(report.collections, 2);
        assert_eq!(report.unresolved, vec!["path \"Nope\"".to_string()]);

        let crime = items.iter().find(|item| item.name == "Crime").unwrap();
        assert_eq!(crime.id, ItemId::new(-0.001));
        assert_eq!(crime.children()[0].collection_id, Some(ItemId::new(-0.001)));
        assert_eq!(crime.children()[0].parent_id, Some(ItemId::new(-0.001)));
        assert_eq!(crime.children()[0].is_alias, Some(true));

        let shows = items.iter().find(|item| item.name == "Shows").unwrap();
        assert_eq!(shows.id, ItemId::new(-0.002));
        assert_eq!(shows.children()[0].id, ItemId::from(2));
        assert_eq!(shows.poster_path.as_deref(), Some("shows.jpg"));

        let series = items.iter().find(|item| item.name == "Series").unwrap();
        assert_eq!(series.id, shows.id);
        assert_eq!(series.is_alias, Some(true));
        assert_eq!(series.original_name.as_deref(), Some("Shows"));
        assert_eq!(series.data, shows.data);
    }

    #[test]
    fn changes_mutate_in_place() {
        let mut items = base_tree();
        let report = resolve_aliases(
            &mut items,
            &mapping(json!({"changes": [{"collection": "Show", "type": "TvCollection", "title": "The Show"}]})),
            &config(),
        );
        assert_eq!(report.changes, 1);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, ItemType::TvCollection);
        assert_eq!(items[0].title.as_deref(), Some("The Show"));
    }

    #[test]
    fn resolution_is_repeatable_and_strippable() {
        let document = mapping(json!({
            "aliases": [{"path": "Show/Season 1", "name": "Alt", "hideOriginal": true}],
            "collections": [{"name": "Crime", "aliases": [{"collection": "Heat"}]}]
        }));
        let mut first = base_tree();
        let mut second = base_tree();
        resolve_aliases(&mut first, &document, &config());
        resolve_aliases(&mut second, &document, &config());
        assert_eq!(first, second);

        strip_non_canonical(&mut first);
        assert_eq!(first, base_tree());
    }

    #[tokio::test]
    async fn missing_mapping_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = load_mapping(&dir.path().join("mapping.json")).await.unwrap();
        assert_eq!(mapping, MappingDocument::default());

        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{\"aliases\": [").unwrap();
        assert!(load_mapping(&path).await.is_err());
    }
}
