use anyhow::{Context, Result, bail};
use geojson::GeoJson;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::features::{
    Feature, FeatureCollection, FieldType, FieldValue, GeometryKind, Schema,
};

/// Reads a GeoJSON FeatureCollection into a schema-ful collection.
///
/// The schema is inferred from the union of property keys: whole numbers map
/// to integer fields, any fractional value promotes the field to double, and
/// mixed numeric/text usage promotes it to text. All features must share one
/// geometry kind.
pub fn read_feature_collection(path: &Path, name: &str) -> Result<FeatureCollection> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("IO: failed to read {:?}", path))?;
    let geojson: GeoJson = text
        .parse()
        .with_context(|| format!("IO: failed to parse {:?} as GeoJSON", path))?;
    let GeoJson::FeatureCollection(fc) = geojson else {
        bail!("IO: {:?} is not a GeoJSON FeatureCollection", path);
    };

    let mut kind: Option<GeometryKind> = None;
    let mut schema = Schema::new();
    let mut parsed: Vec<(geo_types::Geometry<f64>, Map<String, Value>)> = Vec::new();

    for feature in fc.features {
        let geometry = feature
            .geometry
            .with_context(|| format!("IO: feature without geometry in {:?}", path))?;
        let geometry: geo_types::Geometry<f64> = geometry
            .value
            .try_into()
            .map_err(|err| anyhow::anyhow!("IO: unsupported geometry in {:?}: {}", path, err))?;

        let this_kind = GeometryKind::of(&geometry)
            .with_context(|| format!("IO: unsupported geometry kind in {:?}", path))?;
        match kind {
            None => kind = Some(this_kind),
            Some(existing) if existing != this_kind => bail!(
                "IO: mixed geometry kinds in {:?} ({} and {})",
                path,
                existing.label(),
                this_kind.label()
            ),
            Some(_) => {}
        }

        let properties = feature.properties.unwrap_or_default();
        for (key, value) in &properties {
            let observed = match value {
                Value::Null => continue,
                Value::Number(n) => {
                    if n.as_i64().is_some() {
                        FieldType::Integer
                    } else {
                        FieldType::Double
                    }
                }
                _ => FieldType::Text,
            };
            let merged = match schema.field_type(key) {
                None => observed,
                Some(existing) => merge_types(existing, observed),
            };
            schema.add_field(key, merged);
        }

        parsed.push((geometry, properties));
    }

    let kind = kind.unwrap_or(GeometryKind::Point);
    let mut collection = FeatureCollection::new(name, kind, schema);
    for (geometry, properties) in parsed {
        let mut feature = Feature::new(geometry);
        for (key, value) in properties {
            let field_type = collection.schema.field_type(&key).unwrap_or(FieldType::Text);
            feature.set(&key, json_to_field_value(&value, field_type));
        }
        collection.push(feature);
    }
    Ok(collection)
}

fn merge_types(existing: FieldType, observed: FieldType) -> FieldType {
    match (existing, observed) {
        (a, b) if a == b => a,
        (FieldType::Integer, FieldType::Double) | (FieldType::Double, FieldType::Integer) => {
            FieldType::Double
        }
        _ => FieldType::Text,
    }
}

fn json_to_field_value(value: &Value, field_type: FieldType) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Number(n) => match field_type {
            FieldType::Integer => n.as_i64().map(FieldValue::Integer).unwrap_or(FieldValue::Null),
            FieldType::Double => n.as_f64().map(FieldValue::Double).unwrap_or(FieldValue::Null),
            FieldType::Text => FieldValue::Text(n.to_string()),
        },
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn field_value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Integer(v) => Value::from(*v),
        FieldValue::Double(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}

/// Writes a collection as a GeoJSON FeatureCollection. Every feature gets
/// the full schema's field set, nulls included, so consumers see a uniform
/// property layout.
pub fn write_feature_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("IO: failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{{")?;
    writeln!(writer, "  \"type\": \"FeatureCollection\",")?;
    writeln!(writer, "  \"features\": [")?;

    let mut first = true;
    for feature in &collection.features {
        if !first {
            writeln!(writer, ",")?;
        }
        first = false;

        let mut properties = Map::new();
        for name in collection.schema.names() {
            properties.insert(name.to_string(), field_value_to_json(feature.value(name)));
        }

        let geometry = geojson::Geometry::from(&feature.geometry);
        let out = geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        };
        serde_json::to_writer(&mut writer, &GeoJson::Feature(out))?;
    }

    writeln!(writer)?;
    writeln!(writer, "  ]")?;
    writeln!(writer, "}}")?;
    writer.flush()?;
    Ok(())
}
