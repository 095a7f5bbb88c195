//! Foods with known dietary verdicts for live E2E runs

use std::sync::OnceLock;

/// Expected compliance for one food. `None` means the model may go either way.
#[derive(Debug, Clone, Copy)]
pub struct FoodFixture {
    pub food_name: &'static str,
    pub ingredients: &'static str,
    pub image_env: &'static str,
    pub vegetarian: Option<bool>,
    pub jain: Option<bool>,
    pub vegan: Option<bool>,
    pub description: &'static str,
}

/// Images are supplied by URL through the named environment variable so the
/// repository does not ship photos. Fixtures without an image are skipped.
pub const FOOD_FIXTURES: &[FoodFixture] = &[
    FoodFixture {
        food_name: "Potato Chips",
        ingredients: "potato, sunflower oil, salt",
        image_env: "E2E_CHIPS_IMAGE_URL",
        vegetarian: Some(true),
        jain: Some(false),
        vegan: Some(true),
        description: "Root vegetable snack: vegetarian and vegan but not Jain",
    },
    FoodFixture {
        food_name: "Paneer Tikka",
        ingredients: "paneer, yogurt, bell pepper, spices",
        image_env: "E2E_PANEER_IMAGE_URL",
        vegetarian: Some(true),
        jain: None,
        vegan: Some(false),
        description: "Dairy dish: vegetarian, not vegan",
    },
    FoodFixture {
        food_name: "Chicken Curry",
        ingredients: "chicken, onion, garlic, tomato, spices",
        image_env: "E2E_CHICKEN_IMAGE_URL",
        vegetarian: Some(false),
        jain: Some(false),
        vegan: Some(false),
        description: "Meat dish: fails every standard",
    },
];

impl FoodFixture {
    pub fn image_url(&self) -> Option<String> {
        std::env::var(self.image_env).ok().filter(|url| !url.is_empty())
    }
}

/// 1x1 transparent PNG, used where only the upload path matters.
pub fn tiny_png() -> &'static [u8] {
    static PNG: OnceLock<Vec<u8>> = OnceLock::new();
    PNG.get_or_init(|| {
        base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=",
        )
        .expect("valid PNG literal")
    })
}
