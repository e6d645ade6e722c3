use std::{collections::BTreeMap, fmt::Display, sync::LazyLock};

use serde::{Deserialize, Serialize};

use crate::daemon::storage::entities::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    WebBrowsing,
    Productivity,
    Entertainment,
    Communication,
    Creative,
    Development,
    Other,
}

impl Category {
    /// Classifies with the built-in table.
    pub fn of(entity: &EntityKey) -> Category {
        DEFAULT_TABLE.lookup(entity)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::WebBrowsing => "Web Browsing",
            Category::Productivity => "Productivity",
            Category::Entertainment => "Entertainment",
            Category::Communication => "Communication",
            Category::Creative => "Creative",
            Category::Development => "Development",
            Category::Other => "Other",
        };
        f.write_str(name)
    }
}

const DEFAULT_ENTRIES: &[(&str, Category)] = &[
    ("chrome", Category::WebBrowsing),
    ("firefox", Category::WebBrowsing),
    ("edge", Category::WebBrowsing),
    ("msedge", Category::WebBrowsing),
    ("brave", Category::WebBrowsing),
    ("opera", Category::WebBrowsing),
    ("safari", Category::WebBrowsing),
    ("word", Category::Productivity),
    ("winword", Category::Productivity),
    ("excel", Category::Productivity),
    ("powerpoint", Category::Productivity),
    ("powerpnt", Category::Productivity),
    ("outlook", Category::Productivity),
    ("onenote", Category::Productivity),
    ("notion", Category::Productivity),
    ("obsidian", Category::Productivity),
    ("notepad", Category::Productivity),
    ("mail", Category::Productivity),
    ("teams", Category::Productivity),
    ("slack", Category::Productivity),
    ("spotify", Category::Entertainment),
    ("music", Category::Entertainment),
    ("youtube", Category::Entertainment),
    ("netflix", Category::Entertainment),
    ("twitch", Category::Entertainment),
    ("steam", Category::Entertainment),
    ("vlc", Category::Entertainment),
    ("discord", Category::Communication),
    ("skype", Category::Communication),
    ("whatsapp", Category::Communication),
    ("telegram", Category::Communication),
    ("zoom", Category::Communication),
    ("messages", Category::Communication),
    ("photoshop", Category::Creative),
    ("illustrator", Category::Creative),
    ("figma", Category::Creative),
    ("blender", Category::Creative),
    ("unity", Category::Creative),
    ("gimp", Category::Creative),
    ("code", Category::Development),
    ("cursor", Category::Development),
    ("xcode", Category::Development),
    ("idea64", Category::Development),
    ("github", Category::Development),
    ("gitlab", Category::Development),
    ("bitbucket", Category::Development),
    ("stackoverflow", Category::Development),
];

static DEFAULT_TABLE: LazyLock<CategoryTable> = LazyLock::new(CategoryTable::default);

/// Static classification of entities. A process name is looked up as is. A hostname that isn't
/// listed is looked up by its labels, so `music.youtube.com` falls into the `youtube` category.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    entries: BTreeMap<String, Category>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_ENTRIES
                .iter()
                .map(|(name, category)| (name.to_string(), *category)),
        )
    }
}

impl CategoryTable {
    pub fn new(entries: impl IntoIterator<Item = (String, Category)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, category: Category) {
        self.entries.insert(name.into(), category);
    }

    pub fn lookup(&self, entity: &EntityKey) -> Category {
        let name = entity.as_str();
        if let Some(category) = self.entries.get(name) {
            return *category;
        }
        let mut labels = name.split('.').collect::<Vec<_>>();
        if labels.len() < 2 {
            return Category::Other;
        }
        // Top level domain.
        labels.pop();
        labels
            .iter()
            .rev()
            .find_map(|label| self.entries.get(*label).copied())
            .unwrap_or(Category::Other)
    }
}
