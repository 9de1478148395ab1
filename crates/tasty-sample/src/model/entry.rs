use super::{integer, optional_text, related_uri, text};
use crate::error::SiteError;
use chrono::NaiveDateTime;
use tastytopping::{fields, Field, Fields, Resource};

/// A rated entry, optionally written by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub uri: String,
    pub path: String,
    pub rating: i64,
    pub title: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub author: Option<String>,
}

/// Payload for publishing an entry. Unset values take the server's defaults.
#[derive(Debug, Clone, Default)]
pub struct EntryCreate {
    pub path: String,
    pub title: Option<String>,
    pub rating: Option<i64>,
    pub date: Option<NaiveDateTime>,
    pub author: Option<Resource>,
}

impl EntryCreate {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn rated(mut self, rating: i64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn dated(mut self, date: NaiveDateTime) -> Self {
        self.date = Some(date);
        self
    }

    pub fn by(mut self, author: &Resource) -> Self {
        self.author = Some(author.clone());
        self
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = fields! { "path" => self.path };
        let optional: [(&str, Option<Field>); 4] = [
            ("title", self.title.map(Field::from)),
            ("rating", self.rating.map(Field::from)),
            ("date", self.date.map(Field::from)),
            ("created_by", self.author.map(Field::from)),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.insert(name.to_string(), value);
            }
        }
        fields
    }
}

/// Changes applied to one or many entries.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub rating: Option<i64>,
}

impl EntryUpdate {
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        if let Some(title) = self.title {
            fields.insert("title".into(), title.into());
        }
        if let Some(rating) = self.rating {
            fields.insert("rating".into(), rating.into());
        }
        fields
    }
}

impl TryFrom<&Resource> for Entry {
    type Error = SiteError;

    fn try_from(resource: &Resource) -> Result<Self, Self::Error> {
        Ok(Self {
            uri: resource.uri()?,
            path: text(resource, "path")?,
            rating: integer(resource, "rating")?,
            title: optional_text(resource, "title")?,
            date: resource.get("date")?.as_datetime(),
            author: related_uri(resource, "created_by")?,
        })
    }
}
