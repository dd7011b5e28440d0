//! Product records.

use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Cents, FieldErrors, ProductId};

const MIN_NAME_CHARS: usize = 3;
const MIN_DESCRIPTION_CHARS: usize = 10;

/// A downloadable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Cents,
    /// Only available products can be bought.
    pub available: bool,
    /// Location of the downloadable file in product storage.
    pub file_path: String,
    /// Public path of the product image.
    pub image_path: String,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Filename offered to the browser: the product name plus the stored
    /// file's extension.
    #[must_use]
    pub fn download_filename(&self) -> String {
        let name = header_safe(&self.name);
        match Path::new(&self.file_path)
            .extension()
            .and_then(|ext| ext.to_str())
        {
            Some(ext) => format!("{name}.{}", header_safe(ext)),
            None => name,
        }
    }
}

/// Replace characters that would break a quoted `Content-Disposition`
/// filename. Control characters are rejected by header encoding.
fn header_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if matches!(c, '"' | '\\' | '/') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Product metadata as submitted by an administrator. The downloadable file
/// and image are uploaded out of band; only their paths are recorded here.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price_in_cents: i64,
    /// Location of the file relative to product storage.
    pub file_path: String,
    /// Public path of the product image.
    pub image_path: String,
}

/// Validated product metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: Cents,
    pub file_path: String,
    pub image_path: String,
}

impl NewProduct {
    /// Validate the input, collecting every problem by field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldErrors`] when the name is shorter than 3 characters,
    /// the description shorter than 10, the price below one cent, or either
    /// path is blank or escapes its directory.
    pub fn validate(self) -> Result<ProductDraft, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = self.name.trim().to_owned();
        if name.chars().count() < MIN_NAME_CHARS {
            errors.add("name", "Name must be at least 3 characters");
        }

        let description = self.description.trim().to_owned();
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            errors.add("description", "Description must be at least 10 characters");
        }

        if self.price_in_cents < 1 {
            errors.add("price_in_cents", "Price must be at least 1 cent");
        }

        let file_path = self.file_path.trim().to_owned();
        if file_path.is_empty() {
            errors.add("file_path", "File is required");
        } else if !is_contained(&file_path) {
            errors.add("file_path", "File must be inside product storage");
        }

        let image_path = self.image_path.trim().to_owned();
        if image_path.is_empty() {
            errors.add("image_path", "Image is required");
        } else if !is_contained(image_path.trim_start_matches('/')) {
            errors.add("image_path", "Image must be inside the public directory");
        }

        errors.into_result(ProductDraft {
            name,
            description,
            price: Cents::new(self.price_in_cents),
            file_path,
            image_path,
        })
    }
}

/// Relative path made only of normal components.
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl ProductDraft {
    /// A new product. Products start unavailable until an administrator
    /// publishes them.
    #[must_use]
    pub fn into_product(self, now: DateTime<Utc>) -> Product {
        Product {
            id: ProductId::generate(),
            name: self.name,
            description: self.description,
            price: self.price,
            available: false,
            file_path: self.file_path,
            image_path: self.image_path,
            created_at: now,
        }
    }

    /// Replace the metadata of `existing`, keeping its id, availability and
    /// creation time.
    #[must_use]
    pub fn apply_to(self, existing: Product) -> Product {
        Product {
            name: self.name,
            description: self.description,
            price: self.price,
            file_path: self.file_path,
            image_path: self.image_path,
            ..existing
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(name: &str, file_path: &str) -> Product {
        Product {
            id: ProductId::generate(),
            name: name.to_owned(),
            description: "A very useful download".to_owned(),
            price: Cents::new(1999),
            available: true,
            file_path: file_path.to_owned(),
            image_path: "/products/cover.png".to_owned(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_download_filename_uses_extension() {
        let p = product("Rust Handbook", "products/2f1c-handbook.pdf");
        assert_eq!(p.download_filename(), "Rust Handbook.pdf");
    }

    #[test]
    fn test_download_filename_without_extension() {
        let p = product("Soundpack", "products/soundpack");
        assert_eq!(p.download_filename(), "Soundpack");
    }

    #[test]
    fn test_download_filename_strips_header_breaking_chars() {
        let p = product("Evil\"Name\r\n", "products/a.zip");
        assert_eq!(p.download_filename(), "Evil_Name__.zip");
    }

    #[test]
    fn test_download_filename_replaces_control_chars() {
        let p = product("Tab\tBell\u{7}Del\u{7f}", "products/a.zip");
        assert_eq!(p.download_filename(), "Tab_Bell_Del_.zip");
    }

    fn input() -> NewProduct {
        NewProduct {
            name: "Rust Handbook".to_owned(),
            description: "Everything about ownership".to_owned(),
            price_in_cents: 1999,
            file_path: "products/handbook.pdf".to_owned(),
            image_path: "/products/handbook.png".to_owned(),
        }
    }

    #[test]
    fn test_new_product_starts_unavailable() {
        let now = Utc::now();
        let product = input().validate().unwrap().into_product(now);
        assert!(!product.available);
        assert_eq!(product.price, Cents::new(1999));
        assert_eq!(product.created_at, now);
    }

    #[test]
    fn test_new_product_reports_every_field() {
        let errors = NewProduct {
            name: " ab ".to_owned(),
            description: "too short".to_owned(),
            price_in_cents: 0,
            file_path: "../secrets.env".to_owned(),
            image_path: String::new(),
        }
        .validate()
        .unwrap_err();

        assert_eq!(errors.get("name"), ["Name must be at least 3 characters"]);
        assert_eq!(
            errors.get("description"),
            ["Description must be at least 10 characters"]
        );
        assert_eq!(errors.get("price_in_cents"), ["Price must be at least 1 cent"]);
        assert_eq!(errors.get("file_path"), ["File must be inside product storage"]);
        assert_eq!(errors.get("image_path"), ["Image is required"]);
    }

    #[test]
    fn test_absolute_file_path_is_rejected() {
        let mut input = input();
        input.file_path = "/etc/passwd".to_owned();
        assert!(!input.validate().unwrap_err().get("file_path").is_empty());
    }

    #[test]
    fn test_apply_keeps_identity_and_availability() {
        let existing = product("Old Name", "products/old.pdf");
        let updated = input().validate().unwrap().apply_to(existing.clone());
        assert_eq!(updated.id, existing.id);
        assert_eq!(updated.created_at, existing.created_at);
        assert!(updated.available);
        assert_eq!(updated.name, "Rust Handbook");
        assert_eq!(updated.file_path, "products/handbook.pdf");
    }
}
