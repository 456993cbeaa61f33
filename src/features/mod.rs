use geo_types::{Geometry, Point};
use std::collections::HashMap;

/// A single attribute value. Missing attributes read as `Null`.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Key representation used when matching attribute values across
    /// collections (zone names may be text or integer typed).
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::Text(v) => Some(v.clone()),
            FieldValue::Integer(v) => Some(v.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Double,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Double)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
        }
    }
}

/// Ordered field name -> type mapping shared by all features of a collection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, overwriting the type if the name already exists.
    pub fn add_field(&mut self, name: &str, field_type: FieldType) {
        if let Some(existing) = self.fields.iter_mut().find(|(n, _)| n == name) {
            existing.1 = field_type;
        } else {
            self.fields.push((name.to_string(), field_type));
        }
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field-set equality, ignoring declaration order. Appending a later
    /// zone result requires this to hold against the established output.
    pub fn same_fields(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().all(|(n, _)| other.has_field(n))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

impl GeometryKind {
    pub fn label(&self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Line => "line",
            GeometryKind::Polygon => "polygon",
        }
    }

    pub fn of(geometry: &Geometry<f64>) -> Option<GeometryKind> {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(GeometryKind::Point),
            Geometry::LineString(_) | Geometry::MultiLineString(_) => Some(GeometryKind::Line),
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Some(GeometryKind::Polygon),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub attrs: HashMap<String, FieldValue>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            attrs: HashMap::new(),
        }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(Geometry::Point(Point::new(x, y)))
    }

    pub fn value(&self, name: &str) -> &FieldValue {
        self.attrs.get(name).unwrap_or(&FieldValue::Null)
    }

    pub fn set(&mut self, name: &str, value: FieldValue) {
        self.attrs.insert(name.to_string(), value);
    }

    pub fn point_coords(&self) -> Option<(f64, f64)> {
        match &self.geometry {
            Geometry::Point(p) => Some((p.x(), p.y())),
            _ => None,
        }
    }
}

/// An ordered collection of features of one geometry kind sharing a schema.
/// Identity is the workspace-qualified name.
#[derive(Clone, Debug)]
pub struct FeatureCollection {
    pub name: String,
    pub kind: GeometryKind,
    pub schema: Schema,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(name: &str, kind: GeometryKind, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            kind,
            schema,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Point coordinates in row order; non-point rows yield NaN pairs so
    /// indices stay aligned with the feature list.
    pub fn point_coords(&self) -> Vec<(f64, f64)> {
        self.features
            .iter()
            .map(|f| f.point_coords().unwrap_or((f64::NAN, f64::NAN)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_same_fields_ignores_order() {
        let mut a = Schema::new();
        a.add_field("name", FieldType::Text);
        a.add_field("mile", FieldType::Double);

        let mut b = Schema::new();
        b.add_field("mile", FieldType::Double);
        b.add_field("name", FieldType::Text);

        assert!(a.same_fields(&b));
    }

    #[test]
    fn schema_same_fields_detects_extra_field() {
        let mut a = Schema::new();
        a.add_field("name", FieldType::Text);

        let mut b = Schema::new();
        b.add_field("name", FieldType::Text);
        b.add_field("mile", FieldType::Double);

        assert!(!a.same_fields(&b));
        assert!(!b.same_fields(&a));
    }

    #[test]
    fn add_field_overwrites_existing_type() {
        let mut schema = Schema::new();
        schema.add_field("mile", FieldType::Integer);
        schema.add_field("mile", FieldType::Double);

        assert_eq!(schema.len(), 1);
        assert_eq!(schema.field_type("mile"), Some(FieldType::Double));
    }

    #[test]
    fn missing_attribute_reads_as_null() {
        let feature = Feature::point(1.0, 2.0);
        assert!(feature.value("anything").is_null());
    }

    #[test]
    fn field_value_numeric_coercion() {
        assert_eq!(FieldValue::Integer(5).as_f64(), Some(5.0));
        assert_eq!(FieldValue::Double(2.5).as_f64(), Some(2.5));
        assert_eq!(FieldValue::Text("x".into()).as_f64(), None);
        assert_eq!(FieldValue::Null.as_f64(), None);
    }

    #[test]
    fn key_string_covers_text_and_integer_zones() {
        assert_eq!(
            FieldValue::Text("West".into()).key_string(),
            Some("West".to_string())
        );
        assert_eq!(FieldValue::Integer(7).key_string(), Some("7".to_string()));
        assert_eq!(FieldValue::Null.key_string(), None);
    }
}
