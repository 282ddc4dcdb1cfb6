//! Imports YAML and CSV data as lists of document fields.
//!
//! Both loaders produce plain `Vec<Object>` ready to be handed to
//! [Table::insert_multiple](crate::db::Table::insert_multiple), so an import
//! lands in the database as one single mutation.
//!
//! # Examples
//!
//! Importing a YAML file with one document per YAML section:
//! ```
//! # use callisto::db::Database;
//! # use callisto::load::yaml_to_objects;
//! # use callisto::query::field;
//! let input = "
//! name: 'Io'
//! active: true
//! ---
//! name: 'Europa'
//! active: false
//! ";
//!
//! let db = Database::memory().unwrap();
//! let table = db.table("moons").unwrap();
//! table.insert_multiple(yaml_to_objects(input).unwrap()).unwrap();
//!
//! assert_eq!(table.count(&field("active").equals(true)).unwrap(), 1);
//! ```
//!
//! Importing CSV data, one document per line:
//! ```
//! # use csv::ReaderBuilder;
//! # use callisto::load::csv_to_objects;
//! let input = "name;code\r\nIo;JI\r\nEuropa;JII";
//! let reader = ReaderBuilder::new()
//!     .delimiter(b';')
//!     .has_headers(false)
//!     .from_reader(input.as_bytes());
//!
//! let objects = csv_to_objects(reader).unwrap();
//! assert_eq!(objects.len(), 2);
//! assert_eq!(objects[0]["name"].as_str(), Some("Io"));
//! assert_eq!(objects[1]["code"].as_str(), Some("JII"));
//! ```
use csv::Reader;
use linked_hash_map::LinkedHashMap;
use yaml_rust::{Yaml, YamlLoader};

use crate::docs::{Object, Value};
use crate::error::{Error, Result};

/// Parses YAML into one object per YAML document (section).
///
/// Nested hashes and lists are carried over as-is. Empty sections (as caused
/// by a trailing `---`) are skipped.
///
/// # Errors
/// Fails with [Error::InvalidDocument] if the input isn't valid YAML or a
/// non-empty section holds anything but an object.
pub fn yaml_to_objects(input: &str) -> Result<Vec<Object>> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|error| Error::InvalidDocument(format!("malformed YAML: {}", error)))?;

    let mut objects = Vec::with_capacity(docs.len());
    for yaml in &docs {
        match yaml {
            Yaml::Hash(hash) => objects.push(yaml_to_object(hash)),
            Yaml::Null => (),
            other => {
                return Err(Error::InvalidDocument(format!(
                    "expected an object per YAML document but found: {:?}",
                    other
                )))
            }
        }
    }
    log::info!("Loaded {} documents from YAML", objects.len());

    Ok(objects)
}

fn yaml_to_object(hash: &LinkedHashMap<Yaml, Yaml>) -> Object {
    let mut object = Object::new();
    for (key, value) in hash {
        if let Some(key) = key.as_str() {
            if let Some(value) = yaml_to_value(value) {
                let _ = object.insert(key.to_string(), value);
            }
        }
    }

    object
}

fn yaml_to_value(yaml: &Yaml) -> Option<Value> {
    match yaml {
        Yaml::Hash(hash) => Some(Value::Object(yaml_to_object(hash))),
        Yaml::Array(list) => Some(Value::List(list.iter().filter_map(yaml_to_value).collect())),
        Yaml::Boolean(value) => Some(Value::Bool(*value)),
        Yaml::Integer(value) => Some(Value::Int(*value)),
        Yaml::String(value) => Some(Value::Str(value.clone())),
        // Reals which don't parse cleanly are kept as given...
        Yaml::Real(value) => Some(
            value
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Str(value.clone())),
        ),
        Yaml::Null => Some(Value::Null),
        _ => None,
    }
}

/// Reads CSV data into one object per line, all values as strings.
///
/// The first record is taken as the header row naming the fields, so the
/// reader must be built with `has_headers(false)`. Fields beyond the headers
/// are dropped.
///
/// # Errors
/// Fails with [Error::InvalidDocument] if the header row is missing or a line
/// cannot be parsed; the message names the offending line.
pub fn csv_to_objects<R>(mut reader: Reader<R>) -> Result<Vec<Object>>
where
    R: std::io::Read,
{
    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(Ok(record)) => record.iter().map(|header| header.to_string()).collect(),
        Some(Err(error)) => {
            return Err(Error::InvalidDocument(format!(
                "failed to read CSV headers: {}",
                error
            )))
        }
        None => {
            return Err(Error::InvalidDocument(
                "failed to read CSV headers: no input".to_string(),
            ))
        }
    };

    let mut objects = Vec::new();
    let mut line = 2;
    for record in records {
        match record {
            Ok(record) => {
                let mut object = Object::new();
                for (header, value) in headers.iter().zip(record.iter()) {
                    let _ = object.insert(header.clone(), Value::Str(value.to_string()));
                }
                objects.push(object);
            }
            Err(error) => {
                return Err(Error::InvalidDocument(format!(
                    "failed to parse CSV in line {}: {}",
                    line, error
                )));
            }
        }
        line += 1;
    }
    log::info!("Loaded {} documents from CSV", objects.len());

    Ok(objects)
}
