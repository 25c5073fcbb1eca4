//! Structural validation of CSDL schema files.
//!
//! This is not a full EDM model check. It rejects documents the mock service
//! cannot load: malformed XML, a missing `Edmx`/`DataServices`/`Schema`
//! skeleton, unnamed declarations, untyped properties, and entity keys that
//! reference undeclared properties.

use crate::{ConfigError, ConfigResult};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rapidapi_core::schema::SchemaValidator;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Elements that must carry a `Name` attribute.
const NAMED_ELEMENTS: &[&str] = &[
    "EntityType",
    "ComplexType",
    "EnumType",
    "EntityContainer",
    "EntitySet",
];

/// Validator for OData CSDL documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsdlValidator;

impl CsdlValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate CSDL text.
    pub fn validate_str(&self, xml: &str) -> ConfigResult<()> {
        let mut walker = Walker::default();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        loop {
            let event = reader.read_event().map_err(|e| {
                schema_error(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Start(e) => {
                    walker.open(&e)?;
                }
                Event::Empty(e) => {
                    let name = walker.open(&e)?;
                    walker.close(&name)?;
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    walker.close(&name)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        walker.finish()
    }
}

impl SchemaValidator for CsdlValidator {
    fn validate_contents(&self, contents: &[u8]) -> rapidapi_core::Result<()> {
        let xml = std::str::from_utf8(contents)
            .map_err(|e| schema_error(format!("schema is not UTF-8: {}", e)))?;
        Ok(self.validate_str(xml)?)
    }

    fn validate(&self, path: &Path) -> rapidapi_core::Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            schema_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.validate_str(&content)?;
        debug!(path = %path.display(), "Schema file is valid");
        Ok(())
    }
}

/// Entity type whose key is checked once the element closes.
#[derive(Debug, Default)]
struct EntityScope {
    name: String,
    derived: bool,
    properties: HashSet<String>,
    key_refs: Vec<String>,
}

#[derive(Debug, Default)]
struct Walker {
    stack: Vec<String>,
    seen_root: bool,
    seen_data_services: bool,
    schemas: usize,
    entity: Option<EntityScope>,
}

impl Walker {
    fn open(&mut self, element: &BytesStart<'_>) -> ConfigResult<String> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
        let parent = self.stack.last().map(String::as_str);

        match (parent, name.as_str()) {
            (None, "Edmx") => {
                if self.seen_root {
                    return Err(schema_error("multiple root elements"));
                }
                self.seen_root = true;
                if attribute(element, "Version")?.is_none() {
                    return Err(schema_error("Edmx element has no Version"));
                }
            }
            (None, other) => {
                return Err(schema_error(format!(
                    "root element must be Edmx, found {}",
                    other
                )));
            }
            (Some("Edmx"), "DataServices") => {
                self.seen_data_services = true;
            }
            (Some("DataServices"), "Schema") => {
                if attribute(element, "Namespace")?.is_none() {
                    return Err(schema_error("Schema element has no Namespace"));
                }
                self.schemas += 1;
            }
            _ => {}
        }

        if NAMED_ELEMENTS.contains(&name.as_str()) {
            let declared = required(element, &name, "Name")?;
            if name == "EntityType" {
                self.entity = Some(EntityScope {
                    name: declared,
                    derived: attribute(element, "BaseType")?.is_some(),
                    ..Default::default()
                });
            }
        }

        if name == "Property" {
            let property = required(element, "Property", "Name")?;
            required(element, "Property", "Type")?;
            if parent == Some("EntityType") {
                if let Some(entity) = self.entity.as_mut() {
                    entity.properties.insert(property);
                }
            }
        }

        if name == "PropertyRef" && parent == Some("Key") {
            let referenced = required(element, "PropertyRef", "Name")?;
            if let Some(entity) = self.entity.as_mut() {
                entity.key_refs.push(referenced);
            }
        }

        self.stack.push(name.clone());
        Ok(name)
    }

    fn close(&mut self, name: &str) -> ConfigResult<()> {
        match self.stack.pop() {
            Some(open) if open == name => {}
            Some(open) => {
                return Err(schema_error(format!(
                    "expected closing {} but found {}",
                    open, name
                )));
            }
            None => return Err(schema_error(format!("unexpected closing {}", name))),
        }

        if name == "EntityType" {
            if let Some(entity) = self.entity.take() {
                check_key(&entity)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> ConfigResult<()> {
        if let Some(open) = self.stack.last() {
            return Err(schema_error(format!("unclosed element {}", open)));
        }
        if !self.seen_root {
            return Err(schema_error("document is empty"));
        }
        if !self.seen_data_services {
            return Err(schema_error("Edmx element has no DataServices"));
        }
        if self.schemas == 0 {
            return Err(schema_error("DataServices contains no Schema"));
        }
        Ok(())
    }
}

fn check_key(entity: &EntityScope) -> ConfigResult<()> {
    // Derived types may key on inherited properties.
    if entity.derived {
        return Ok(());
    }
    for key in &entity.key_refs {
        if !entity.properties.contains(key) {
            return Err(schema_error(format!(
                "key of entity type {} references undeclared property {}",
                entity.name, key
            )));
        }
    }
    Ok(())
}

fn attribute(element: &BytesStart<'_>, name: &str) -> ConfigResult<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| schema_error(format!("bad attribute on {}: {}", local(element), e)))?;

    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| schema_error(format!("bad {} value: {}", name, e)))?;
            Ok(Some(value.into_owned()).filter(|v| !v.trim().is_empty()))
        }
        None => Ok(None),
    }
}

fn required(element: &BytesStart<'_>, kind: &str, name: &str) -> ConfigResult<String> {
    attribute(element, name)?
        .ok_or_else(|| schema_error(format!("{} element has no {}", kind, name)))
}

fn local(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn schema_error(detail: impl Into<String>) -> ConfigError {
    ConfigError::Schema(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Demo" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Product">
        <Key>
          <PropertyRef Name="Id" />
        </Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false" />
        <Property Name="Name" Type="Edm.String" />
        <NavigationProperty Name="Category" Type="Demo.Category" />
      </EntityType>
      <EntityType Name="Special" BaseType="Demo.Product">
        <Key>
          <PropertyRef Name="Id" />
        </Key>
        <Property Name="Discount" Type="Edm.Decimal" />
      </EntityType>
      <EntityType Name="Category">
        <Key>
          <PropertyRef Name="Id" />
        </Key>
        <Property Name="Id" Type="Edm.Int32" />
      </EntityType>
      <ComplexType Name="Address">
        <Property Name="City" Type="Edm.String" />
      </ComplexType>
      <EnumType Name="Color">
        <Member Name="Red" />
      </EnumType>
      <EntityContainer Name="Container">
        <EntitySet Name="Products" EntityType="Demo.Product" />
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    fn assert_invalid(xml: &str, fragment: &str) {
        match CsdlValidator::new().validate_str(xml) {
            Err(ConfigError::Schema(detail)) => {
                assert!(detail.contains(fragment), "{detail:?} lacks {fragment:?}")
            }
            other => panic!("Expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_document() {
        CsdlValidator::new().validate_str(VALID).unwrap();
    }

    #[test]
    fn test_malformed_xml() {
        assert_invalid(&VALID.replace("</Schema>", ""), "");
        assert_invalid("<edmx:Edmx Version=\"4.0\"", "");
    }

    #[test]
    fn test_wrong_root() {
        assert_invalid("<Schema Namespace=\"x\"/>", "root element must be Edmx");
    }

    #[test]
    fn test_missing_version() {
        assert_invalid(&VALID.replace("Version=\"4.0\"", ""), "no Version");
    }

    #[test]
    fn test_missing_data_services() {
        assert_invalid(r#"<Edmx Version="4.0"></Edmx>"#, "no DataServices");
        assert_invalid(
            r#"<Edmx Version="4.0"><DataServices></DataServices></Edmx>"#,
            "no Schema",
        );
    }

    #[test]
    fn test_schema_needs_namespace() {
        assert_invalid(&VALID.replace("Namespace=\"Demo\"", ""), "no Namespace");
    }

    #[test]
    fn test_property_needs_type() {
        assert_invalid(
            &VALID.replace(r#"<Property Name="Name" Type="Edm.String" />"#, r#"<Property Name="Name" />"#),
            "Property element has no Type",
        );
    }

    #[test]
    fn test_entity_set_needs_name() {
        assert_invalid(
            &VALID.replace(r#"EntitySet Name="Products""#, "EntitySet"),
            "EntitySet element has no Name",
        );
    }

    #[test]
    fn test_key_must_reference_declared_property() {
        assert_invalid(
            &VALID.replace(r#"<PropertyRef Name="Id" />"#, r#"<PropertyRef Name="Missing" />"#),
            "undeclared property Missing",
        );
    }

    #[test]
    fn test_file_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.csdl");
        std::fs::write(&path, VALID).unwrap();
        CsdlValidator::new().validate(&path).unwrap();

        std::fs::write(&path, "not xml at all").unwrap();
        let err = CsdlValidator::new().validate(&path).unwrap_err();
        assert!(matches!(err, rapidapi_core::Error::InvalidSchema(_)));
    }

    #[test]
    fn test_in_memory_validation() {
        let validator = CsdlValidator::new();
        validator.validate_contents(VALID.as_bytes()).unwrap();

        let err = validator.validate_contents(&[0xff, 0xfe, b'<']).unwrap_err();
        assert!(matches!(err, rapidapi_core::Error::InvalidSchema(_)));
    }

    #[test]
    fn test_missing_file_is_invalid_schema() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsdlValidator::new()
            .validate(&dir.path().join("absent.csdl"))
            .unwrap_err();
        assert!(matches!(err, rapidapi_core::Error::InvalidSchema(_)));
    }
}
