use std::collections::HashMap;

use common::{ItemId, ItemType, LibraryItem, VideoLibrary};

/// Position of a node: child indices from the top-level array down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: Vec<usize>,
    /// Inside an alias copy (or is one).
    pub alias: bool,
}

/// Side index over a library tree: every occurrence of each id, the parent
/// of each canonical node and file durations by uri. Rebuilt whenever the
/// tree is replaced; never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryIndex {
    locations: HashMap<ItemId, Vec<Location>>,
    parents: HashMap<ItemId, ItemId>,
    durations: HashMap<String, f64>,
}

impl LibraryIndex {
    pub fn build(items: &[LibraryItem]) -> Self {
        let mut index = LibraryIndex::default();
        let mut path = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            path.push(idx);
            index.visit(item, None, false, &mut path);
            path.pop();
        }
        index
    }

    fn visit(
        &mut self,
        item: &LibraryItem,
        parent: Option<ItemId>,
        in_alias: bool,
        path: &mut Vec<usize>,
    ) {
        let alias = in_alias || item.is_alias() || item.is_alias_only();
        self.locations.entry(item.id).or_default().push(Location {
            path: path.clone(),
            alias,
        });
        if !alias {
            if let Some(parent) = parent {
                self.parents.entry(item.id).or_insert(parent);
            }
            if item.kind == ItemType::File {
                if let (Some(uri), Some(duration)) = (&item.uri, item.duration) {
                    self.durations.entry(uri.clone()).or_insert(duration);
                }
            }
        }
        for (idx, child) in item.children().iter().enumerate() {
            path.push(idx);
            self.visit(child, Some(item.id), alias, path);
            path.pop();
        }
    }

    pub fn locations(&self, id: ItemId) -> &[Location] {
        self.locations.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn canonical(&self, id: ItemId) -> Option<&Location> {
        self.locations(id).iter().find(|location| !location.alias)
    }

    pub fn parent_of(&self, id: ItemId) -> Option<ItemId> {
        self.parents.get(&id).copied()
    }

    pub fn duration_of(&self, uri: &str) -> Option<f64> {
        self.durations.get(uri).copied()
    }
}

pub fn item_at<'a>(items: &'a [LibraryItem], path: &[usize]) -> Option<&'a LibraryItem> {
    let (first, rest) = path.split_first()?;
    let mut node = items.get(*first)?;
    for idx in rest {
        node = node.data.as_ref()?.get(*idx)?;
    }
    Some(node)
}

pub fn item_at_mut<'a>(items: &'a mut [LibraryItem], path: &[usize]) -> Option<&'a mut LibraryItem> {
    let (first, rest) = path.split_first()?;
    let mut node = items.get_mut(*first)?;
    for idx in rest {
        node = node.data.as_mut()?.get_mut(*idx)?;
    }
    Some(node)
}

/// Visits every occurrence of `id` in a tree without an index.
pub fn for_each_occurrence(
    items: &mut [LibraryItem],
    id: ItemId,
    apply: &mut dyn FnMut(&mut LibraryItem),
) -> usize {
    let mut count = 0;
    for item in items.iter_mut() {
        if item.id == id {
            apply(item);
            count += 1;
        }
        if let Some(children) = item.data.as_mut() {
            count += for_each_occurrence(children, id, apply);
        }
    }
    count
}

/// A committed library together with its side index.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedLibrary {
    pub library: VideoLibrary,
    pub index: LibraryIndex,
}

impl CachedLibrary {
    pub fn new(library: VideoLibrary) -> Self {
        let index = LibraryIndex::build(&library.array);
        Self { library, index }
    }

    /// Canonical node for `id`; with `files_only` only File nodes match.
    pub fn find(&self, id: ItemId, files_only: bool) -> Option<&LibraryItem> {
        let location = self.index.canonical(id)?;
        let item = item_at(&self.library.array, &location.path)?;
        if files_only && item.kind != ItemType::File {
            return None;
        }
        Some(item)
    }

    /// Every alias copy of `id`.
    pub fn aliases(&self, id: ItemId) -> Vec<&LibraryItem> {
        self.index
            .locations(id)
            .iter()
            .filter(|location| location.alias)
            .filter_map(|location| item_at(&self.library.array, &location.path))
            .collect()
    }

    pub fn parent(&self, id: ItemId) -> Option<&LibraryItem> {
        let parent = self.index.parent_of(id)?;
        self.find(parent, false)
    }

    pub fn duration_of(&self, uri: &str) -> Option<f64> {
        self.index.duration_of(uri)
    }

    /// Applies `apply` to the canonical node and all alias copies of `id`.
    /// Only field updates are allowed: the tree shape must not change.
    pub fn update_all(&mut self, id: ItemId, mut apply: impl FnMut(&mut LibraryItem)) -> usize {
        let mut count = 0;
        for location in self.index.locations(id) {
            if let Some(item) = item_at_mut(&mut self.library.array, &location.path) {
                apply(item);
                count += 1;
            }
        }
        count
    }

    /// Ids of nodes of the given kinds, canonical occurrences only.
    pub fn ids_of_kind(&self, kinds: &[ItemType]) -> Vec<ItemId> {
        let mut ids = Vec::new();
        collect_ids(&self.library.array, kinds, &mut ids);
        ids
    }
}

fn collect_ids(items: &[LibraryItem], kinds: &[ItemType], out: &mut Vec<ItemId>) {
    for item in items {
        if item.is_alias() || item.is_alias_only() || item.id.is_fractional() {
            continue;
        }
        if kinds.contains(&item.kind) && !item.id.is_synthetic() {
            out.push(item.id);
        }
        collect_ids(item.children(), kinds, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, kind: ItemType, name: &str, children: Vec<LibraryItem>) -> LibraryItem {
        let mut item = LibraryItem::new(ItemId::from(id), kind, name);
        if !children.is_empty() {
            item.data = Some(children);
        }
        item
    }

    fn tree() -> Vec<LibraryItem> {
        let mut file = node(3, ItemType::File, "ep1.mkv", vec![]);
        file.uri = Some("/videos/Show/Season 1/ep1.mkv".to_string());
        file.duration = Some(1800.0);
        let season = node(2, ItemType::TvSeason, "Season 1", vec![node(
            4,
            ItemType::TvEpisode,
            "Pilot",
            vec![file],
        )]);
        let show = node(1, ItemType::TvShow, "Show", vec![season.clone()]);
        let mut alias = season;
        alias.name = "Alt Name".to_string();
        alias.is_alias = Some(true);
        alias.collection_id = Some(ItemId::ALIAS_ONLY);
        vec![show, alias]
    }

    #[test]
    fn canonical_lookup_skips_aliases() {
        let cached = CachedLibrary::new(VideoLibrary {
            array: tree(),
            ..VideoLibrary::default()
        });
        let season = cached.find(ItemId::from(2), false).unwrap();
        assert_eq!(season.name, "Season 1");
        assert!(cached.find(ItemId::from(2), true).is_none());
        assert_eq!(cached.find(ItemId::from(3), true).unwrap().name, "ep1.mkv");

        let aliases = cached.aliases(ItemId::from(2));
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].name, "Alt Name");
        // Descendants of an alias are alias occurrences too.
        assert_eq!(cached.aliases(ItemId::from(3)).len(), 1);
    }

    #[test]
    fn parents_and_durations_come_from_canonical_nodes() {
        let cached = CachedLibrary::new(VideoLibrary {
            array: tree(),
            ..VideoLibrary::default()
        });
        assert_eq!(cached.parent(ItemId::from(2)).unwrap().name, "Show");
        assert_eq!(cached.parent(ItemId::from(4)).unwrap().name, "Season 1");
        assert!(cached.parent(ItemId::from(1)).is_none());
        assert_eq!(cached.duration_of("/videos/Show/Season 1/ep1.mkv"), Some(1800.0));
    }

    #[test]
    fn update_all_touches_every_occurrence() {
        let mut cached = CachedLibrary::new(VideoLibrary {
            array: tree(),
            ..VideoLibrary::default()
        });
        let count = cached.update_all(ItemId::from(3), |item| item.watched = Some(true));
        assert_eq!(count, 2);
        assert_eq!(cached.find(ItemId::from(3), true).unwrap().watched, Some(true));
        assert_eq!(cached.aliases(ItemId::from(3))[0].watched, Some(true));
        assert_eq!(cached.find(ItemId::from(4), false).unwrap().watched, None);
    }

    #[test]
    fn ids_of_kind_ignores_alias_copies() {
        let cached = CachedLibrary::new(VideoLibrary {
            array: tree(),
            ..VideoLibrary::default()
        });
        assert_eq!(cached.ids_of_kind(&[ItemType::TvSeason]), vec![ItemId::from(2)]);
    }
}
