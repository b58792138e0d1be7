use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cache::{ImageCache, ImageCacheEntry};
use crate::error::Result;
use crate::imagegen::{ImageBackend, ImageRequest};

const IMAGE_PREFIX: &str = "horror_";
const GENERATED_PREFIX: &str = "horror_generated_";

const SETTINGS: &[&str] = &[
    "house", "forest", "school", "hospital", "church", "library", "attic", "basement", "mansion",
    "cabin", "apartment", "graveyard",
];
const LOCATIONS: &[&str] = &[
    "room", "hallway", "corridor", "staircase", "doorway", "window", "garden", "pathway",
    "entrance",
];
const OBJECTS: &[&str] = &[
    "mirror", "doll", "book", "phone", "computer", "music box", "painting", "door", "clock",
    "lamp", "chest",
];
const ATMOSPHERES: &[&str] = &[
    "fog", "mist", "shadows", "darkness", "twilight", "moonlight", "candlelight", "storm", "rain",
];

const BASE_STYLE: &str = "digital art, atmospheric horror scene, dark and mysterious but \
     suitable for teens, no blood, no gore, no disturbing imagery, cinematic lighting, moody \
     atmosphere, professional digital artwork";

const VARIATIONS: &[&str] = &[
    ", viewed from a different angle",
    ", with heavier atmosphere",
    ", at a different time of day",
    ", with subtle color variations",
    ", with additional atmospheric details",
];

#[derive(Debug, Clone)]
pub struct StoryTheme {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeWords {
    pub setting: &'static str,
    pub location: &'static str,
    pub object: &'static str,
    pub atmosphere: &'static str,
}

/// One entry in the ordered slot sequence handed to the compositor.
/// Slot durations always sum to the narration duration.
#[derive(Debug, Clone)]
pub struct ImageSlot {
    pub path: PathBuf,
    pub display_duration: f64,
}

pub struct ImageGuarantor<'a> {
    images_dir: PathBuf,
    cache: &'a ImageCache,
    backend: &'a ImageBackend,
    image_size: String,
    image_quality: String,
}

impl<'a> ImageGuarantor<'a> {
    pub fn new(
        images_dir: PathBuf,
        cache: &'a ImageCache,
        backend: &'a ImageBackend,
        image_size: String,
        image_quality: String,
    ) -> Self {
        Self {
            images_dir,
            cache,
            backend,
            image_size,
            image_quality,
        }
    }

    /// Returns `required` image paths in randomized order, reusing existing
    /// images before generating new ones. Degrades to whatever exists when
    /// the backend is unavailable; the caller decides whether empty is fatal.
    pub async fn ensure_images(&self, theme: &StoryTheme, required: usize) -> Result<Vec<PathBuf>> {
        let mut available = self.existing_images()?;
        info!("found {} existing images", available.len());

        let mut rng = rand::thread_rng();
        if available.len() >= required {
            let mut selected: Vec<PathBuf> = available
                .choose_multiple(&mut rng, required)
                .cloned()
                .collect();
            selected.shuffle(&mut rng);
            info!("using {required} existing images in random order");
            return Ok(selected);
        }

        let deficit = required - available.len();
        if !self.backend.is_enabled() {
            warn!(
                "generation unavailable; continuing with {} of {required} images",
                available.len()
            );
            available.shuffle(&mut rng);
            return Ok(available);
        }

        info!("generating {deficit} additional images");
        let prompts = derive_prompts(theme, deficit);
        for (i, prompt) in prompts.iter().enumerate() {
            let key = content_key(prompt, &self.image_size, &self.image_quality);
            if let Some(path) = self.cache.lookup(&key) {
                info!("cache hit for image {}/{}", i + 1, prompts.len());
                available.push(path);
                continue;
            }
            match self.generate_one(theme, prompt, &key).await {
                Ok(path) => available.push(path),
                Err(e) => warn!("image generation {}/{} failed: {e}", i + 1, prompts.len()),
            }
        }

        available.shuffle(&mut rng);
        available.truncate(required);
        Ok(available)
    }

    async fn generate_one(&self, theme: &StoryTheme, prompt: &str, key: &str) -> Result<PathBuf> {
        let bytes = self
            .backend
            .generate(&ImageRequest {
                prompt: prompt.to_string(),
                size: self.image_size.clone(),
                quality: self.image_quality.clone(),
            })
            .await?;
        let path = self
            .images_dir
            .join(format!("{GENERATED_PREFIX}{}.png", &key[..16]));
        fs::write(&path, &bytes)?;
        self.cache.insert(ImageCacheEntry {
            content_key: key.to_string(),
            file_path: path.clone(),
            created_at: Utc::now(),
            source_prompt: prompt.to_string(),
            owning_story_title: theme.title.clone(),
        });
        info!("generated and cached {}", path.display());
        Ok(path)
    }

    fn existing_images(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        if !self.images_dir.exists() {
            return Ok(found);
        }
        for dir_entry in fs::read_dir(&self.images_dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(IMAGE_PREFIX) && name.ends_with(".png") {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

/// Divides the narration duration across the slot sequence. The last slot
/// absorbs rounding so the sum is exact.
pub fn allocate_slots(paths: &[PathBuf], narration_duration: f64) -> Vec<ImageSlot> {
    if paths.is_empty() {
        return Vec::new();
    }
    let per_image = narration_duration / paths.len() as f64;
    let mut slots = Vec::with_capacity(paths.len());
    let mut allocated = 0.0;
    for (i, path) in paths.iter().enumerate() {
        let display_duration = if i + 1 == paths.len() {
            narration_duration - allocated
        } else {
            per_image
        };
        allocated += display_duration;
        slots.push(ImageSlot {
            path: path.clone(),
            display_duration,
        });
    }
    slots
}

pub fn extract_theme_words(theme: &StoryTheme) -> ThemeWords {
    let text = format!("{} {}", theme.title, theme.content).to_lowercase();
    let pick = |vocab: &[&'static str], default: &'static str| {
        vocab
            .iter()
            .find(|word| text.contains(**word))
            .copied()
            .unwrap_or(default)
    };
    ThemeWords {
        setting: pick(SETTINGS, "house"),
        location: pick(LOCATIONS, "room"),
        object: pick(OBJECTS, "mirror"),
        atmosphere: pick(ATMOSPHERES, "shadows"),
    }
}

pub fn derive_prompts(theme: &StoryTheme, count: usize) -> Vec<String> {
    let words = extract_theme_words(theme);
    let templates = [
        format!(
            "A mysterious {} at {}, empty and atmospheric, {BASE_STYLE}",
            words.setting, words.atmosphere
        ),
        format!(
            "The interior of an old {}, dim lighting with {}, vintage furniture, {BASE_STYLE}",
            words.setting, words.atmosphere
        ),
        format!(
            "An antique {} in a dark {}, surrounded by {}, mysterious and eerie, {BASE_STYLE}",
            words.object, words.location, words.atmosphere
        ),
        format!(
            "A long {} with {}, old-fashioned lighting, perspective view, {BASE_STYLE}",
            words.location, words.atmosphere
        ),
        format!(
            "A {} exterior at night, {} surrounding it, moonlight casting shadows, {BASE_STYLE}",
            words.setting, words.atmosphere
        ),
        format!("A misty graveyard with ancient headstones under moonlight, {BASE_STYLE}"),
        format!(
            "An abandoned library with floating dust in pale light, old books and {}, {BASE_STYLE}",
            words.atmosphere
        ),
        format!(
            "A foggy street with old-fashioned lampposts, {} creating long shadows, {BASE_STYLE}",
            words.atmosphere
        ),
    ];

    (0..count)
        .map(|i| {
            let mut prompt = templates[i % templates.len()].clone();
            if i > 0 {
                prompt.push_str(VARIATIONS[i % VARIATIONS.len()]);
            }
            prompt
        })
        .collect()
}

/// Deterministic key over everything that shapes the generated pixels.
pub fn content_key(prompt: &str, size: &str, quality: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"|");
    hasher.update(size.as_bytes());
    hasher.update(b"|");
    hasher.update(quality.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ImageCache;
    use crate::imagegen::ImageBackend;
    use std::collections::HashSet;
    use std::path::Path;

    fn theme(title: &str, content: &str) -> StoryTheme {
        StoryTheme {
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    fn seed_images(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("horror_{i:03}.png"));
                fs::write(&path, b"png").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn theme_words_match_story_text() {
        let words = extract_theme_words(&theme(
            "The Basement",
            "We heard footsteps on the staircase. The old clock struck twelve in the fog.",
        ));
        assert_eq!(words.setting, "basement");
        assert_eq!(words.location, "staircase");
        assert_eq!(words.object, "clock");
        assert_eq!(words.atmosphere, "fog");
    }

    #[test]
    fn theme_words_fall_back_to_defaults() {
        let words = extract_theme_words(&theme("Untitled", "nothing matches here"));
        assert_eq!(
            words,
            ThemeWords {
                setting: "house",
                location: "room",
                object: "mirror",
                atmosphere: "shadows",
            }
        );
    }

    #[test]
    fn prompts_cover_deficit_and_vary() {
        let prompts = derive_prompts(&theme("The Mirror", "a doll in the attic"), 12);
        assert_eq!(prompts.len(), 12);
        let unique: HashSet<&String> = prompts.iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn content_key_is_stable_and_parameter_sensitive() {
        let a = content_key("a misty forest path", "1792x1024", "standard");
        let b = content_key("a misty forest path", "1792x1024", "standard");
        let c = content_key("a misty forest path", "1792x1024", "hd");
        let d = content_key("a misty forest path", "1024x1024", "standard");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn slots_sum_to_narration_duration() {
        let paths: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("{i}.png"))).collect();
        let slots = allocate_slots(&paths, 31.7);
        assert_eq!(slots.len(), 7);
        let sum: f64 = slots.iter().map(|s| s.display_duration).sum();
        assert!((sum - 31.7).abs() < 0.01, "sum was {sum}");
    }

    #[test]
    fn slots_for_empty_input_are_empty() {
        assert!(allocate_slots(&[], 30.0).is_empty());
    }

    #[tokio::test]
    async fn enough_existing_images_means_no_generation() {
        let dir = tempfile::tempdir().unwrap();
        let seeded = seed_images(dir.path(), 6);
        let cache = ImageCache::open(dir.path());
        let backend = ImageBackend::Disabled;
        let guarantor = ImageGuarantor::new(
            dir.path().to_path_buf(),
            &cache,
            &backend,
            "1792x1024".into(),
            "standard".into(),
        );

        let selected = guarantor
            .ensure_images(&theme("t", "c"), 4)
            .await
            .unwrap();
        assert_eq!(selected.len(), 4);
        let pool: HashSet<&PathBuf> = seeded.iter().collect();
        assert!(selected.iter().all(|p| pool.contains(p)));
    }

    #[tokio::test]
    async fn disabled_backend_degrades_to_existing_images() {
        let dir = tempfile::tempdir().unwrap();
        seed_images(dir.path(), 2);
        let cache = ImageCache::open(dir.path());
        let backend = ImageBackend::Disabled;
        let guarantor = ImageGuarantor::new(
            dir.path().to_path_buf(),
            &cache,
            &backend,
            "1792x1024".into(),
            "standard".into(),
        );

        let selected = guarantor
            .ensure_images(&theme("t", "c"), 5)
            .await
            .unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn no_images_anywhere_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::open(dir.path());
        let backend = ImageBackend::Disabled;
        let guarantor = ImageGuarantor::new(
            dir.path().to_path_buf(),
            &cache,
            &backend,
            "1792x1024".into(),
            "standard".into(),
        );

        let selected = guarantor.ensure_images(&theme("t", "c"), 3).await.unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn cache_index_is_not_picked_up_as_image() {
        let dir = tempfile::tempdir().unwrap();
        seed_images(dir.path(), 1);
        fs::write(dir.path().join("generated_images_cache.json"), b"{}").unwrap();
        fs::write(dir.path().join("unrelated.png"), b"png").unwrap();
        let cache = ImageCache::open(dir.path());
        let backend = ImageBackend::Disabled;
        let guarantor = ImageGuarantor::new(
            dir.path().to_path_buf(),
            &cache,
            &backend,
            "1792x1024".into(),
            "standard".into(),
        );
        let found = guarantor.existing_images().unwrap();
        assert_eq!(found.len(), 1);
    }
}
