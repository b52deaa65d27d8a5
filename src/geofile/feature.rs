use std::collections::HashMap;

/// Attribute values of a feature, keyed by field name.
pub type FeatureMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: geo::Geometry,
    // All values are carried as strings. Numeric GDAL fields are formatted on read.
    pub attributes: Option<FeatureMap>,
}

impl Feature {
    pub fn new_with_attributes(geometry: geo::Geometry, attributes: FeatureMap) -> Self {
        Self {
            geometry,
            attributes: Some(attributes),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.get(name))
            .map(|value| value.as_str())
    }
}
