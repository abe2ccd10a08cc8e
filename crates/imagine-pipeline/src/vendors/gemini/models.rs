/// A selectable analysis model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GeminiModel {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro-preview";

pub const GEMINI_MODELS: [GeminiModel; 3] = [
    GeminiModel {
        id: "gemini-3-pro-preview",
        display_name: "Gemini 3 Pro",
        description: "Deepest reasoning, best insights, slowest",
    },
    GeminiModel {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        description: "High-end reasoning, stable, long context",
    },
    GeminiModel {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        description: "Balanced, good quality, faster",
    },
];

pub fn find_model(id: &str) -> Option<&'static GeminiModel> {
    GEMINI_MODELS.iter().find(|m| m.id == id)
}
