use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleCategory {
    #[default]
    Castle,
    Beach,
    Garden,
    Hotel,
    Boho,
    Custom,
}

/// Icon tag for a catalog entry. How a tag is drawn is decided by the
/// presentation layer, not by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    Castle,
    Sun,
    Flower,
    Building,
    Leaf,
    Pencil,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StyleOption {
    pub category: StyleCategory,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: Icon,
}

pub static STYLE_CATALOG: [StyleOption; 6] = [
    StyleOption {
        category: StyleCategory::Castle,
        name: "Castle Ballroom",
        description: "An elegant hall with chandeliers.",
        icon: Icon::Castle,
    },
    StyleOption {
        category: StyleCategory::Beach,
        name: "Beach",
        description: "Sandy shore at golden hour.",
        icon: Icon::Sun,
    },
    StyleOption {
        category: StyleCategory::Garden,
        name: "Garden",
        description: "Lush greenery and florals.",
        icon: Icon::Flower,
    },
    StyleOption {
        category: StyleCategory::Hotel,
        name: "Luxury Hotel",
        description: "Modern, classy interiors.",
        icon: Icon::Building,
    },
    StyleOption {
        category: StyleCategory::Boho,
        name: "Boho Outdoor",
        description: "Meadow or forest with soft light.",
        icon: Icon::Leaf,
    },
    StyleOption {
        category: StyleCategory::Custom,
        name: "Custom Venue",
        description: "Describe your own dream place.",
        icon: Icon::Pencil,
    },
];

impl StyleCategory {
    pub fn option(self) -> &'static StyleOption {
        // Catalog order matches declaration order.
        &STYLE_CATALOG[self as usize]
    }
}

/// Current venue choice. Mutations are unchecked; the lifecycle validates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSelection {
    pub category: StyleCategory,
    #[serde(default)]
    pub custom_text: String,
}

impl StyleSelection {
    pub fn set_category(&mut self, category: StyleCategory) {
        self.category = category;
    }

    pub fn set_custom_text(&mut self, text: impl Into<String>) {
        self.custom_text = text.into();
    }

    /// `None` when Custom is chosen but nothing usable was typed.
    pub fn directive(&self) -> Option<String> {
        match self.category {
            StyleCategory::Custom => {
                let text = self.custom_text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            other => {
                let option = other.option();
                Some(format!("{}: {}", option.name, option.description))
            }
        }
    }
}
