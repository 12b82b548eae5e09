use serde::{Deserialize, Serialize};

/// Envelope every catalog endpoint responds with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
  pub data: T,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub success: bool,
}

/// A catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Focaccia {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub price: f64,
  #[serde(default)]
  pub image_url: String,
  #[serde(default)]
  pub featured: bool,
  #[serde(default)]
  pub is_veggie: bool,
}

/// Body for creating an item; the server assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocacciaCreate {
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub price: f64,
  #[serde(default)]
  pub image_url: String,
  #[serde(default)]
  pub featured: bool,
  #[serde(default)]
  pub is_veggie: bool,
}

pub type CatalogList = ApiResponse<Vec<Focaccia>>;

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_envelope_parses_camel_case_items() {
    let body = json!({
      "data": [{"id": 1, "name": "Clásica", "price": 4500.0, "imageUrl": "https://img/1.jpg", "isVeggie": true}],
      "message": "ok",
      "success": true
    });

    let parsed: CatalogList = serde_json::from_value(body).unwrap();
    assert_eq!(parsed.data.len(), 1);
    assert_eq!(parsed.data[0].image_url, "https://img/1.jpg");
    assert!(parsed.data[0].is_veggie);
    assert!(!parsed.data[0].featured);
  }

  #[test]
  fn test_envelope_tolerates_missing_message() {
    let parsed: ApiResponse<Option<Focaccia>> =
      serde_json::from_value(json!({"data": null})).unwrap();
    assert_eq!(parsed.data, None);
    assert!(parsed.message.is_empty());
    assert!(!parsed.success);
  }
}
