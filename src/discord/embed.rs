use serde_json::Value;

use super::DiscordEmbed;

/// Color of every mirrored rich embed.
pub const MIRROR_EMBED_COLOR: u32 = 0x7b253c;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<WebhookEmbedField>,
    pub thumbnail_url: Option<String>,
}

impl WebhookEmbed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-creates a fetched rich embed for the target webhook. Fields are
    /// laid out inline.
    pub fn from_source(source: &DiscordEmbed) -> Self {
        let mut embed = Self::new().color(MIRROR_EMBED_COLOR);
        if let Some(title) = &source.title {
            embed = embed.title(title.clone());
        }
        if let Some(description) = &source.description {
            embed = embed.description(description.clone());
        }
        if let Some(url) = &source.url {
            embed = embed.url(url.clone());
        }

        for field in &source.fields {
            embed = embed.field(field.name.clone(), field.value.clone(), true);
        }
        if let Some(thumbnail) = source.thumbnail_url() {
            embed = embed.thumbnail(thumbnail);
        }
        embed
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        inline: bool,
    ) -> Self {
        self.fields.push(WebhookEmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut embed = serde_json::Map::new();

        if let Some(ref title) = self.title {
            embed.insert("title".to_string(), Value::String(title.clone()));
        }

        if let Some(ref description) = self.description {
            embed.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }

        if let Some(ref url) = self.url {
            embed.insert("url".to_string(), Value::String(url.clone()));
        }

        if let Some(color) = self.color {
            embed.insert("color".to_string(), Value::Number(color.into()));
        }

        if !self.fields.is_empty() {
            let fields: Vec<Value> = self
                .fields
                .iter()
                .map(|f| {
                    let mut field = serde_json::Map::new();
                    field.insert("name".to_string(), Value::String(f.name.clone()));
                    field.insert("value".to_string(), Value::String(f.value.clone()));
                    field.insert("inline".to_string(), Value::Bool(f.inline));
                    Value::Object(field)
                })
                .collect();
            embed.insert("fields".to_string(), Value::Array(fields));
        }

        if let Some(ref thumbnail_url) = self.thumbnail_url {
            let mut thumbnail = serde_json::Map::new();
            thumbnail.insert("url".to_string(), Value::String(thumbnail_url.clone()));
            embed.insert("thumbnail".to_string(), Value::Object(thumbnail));
        }

        Value::Object(embed)
    }
}
