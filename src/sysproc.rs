//! Names and parameter decoding for the `@`-prefixed system procedures.

use crate::catalog::types::Value;
use crate::classes::{ClassPattern, parse_patterns};
use crate::error::LivecatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysProc {
    UpdateApplicationCatalog,
    UpdateClasses,
    SystemCatalog,
    Statistics,
    Pause,
    Resume,
    AdHoc,
}

impl SysProc {
    pub fn parse(name: &str) -> Option<Self> {
        match name.strip_prefix('@')? {
            "UpdateApplicationCatalog" => Some(SysProc::UpdateApplicationCatalog),
            "UpdateClasses" => Some(SysProc::UpdateClasses),
            "SystemCatalog" => Some(SysProc::SystemCatalog),
            "Statistics" => Some(SysProc::Statistics),
            "Pause" => Some(SysProc::Pause),
            "Resume" => Some(SysProc::Resume),
            "AdHoc" => Some(SysProc::AdHoc),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SysProc::UpdateApplicationCatalog => "@UpdateApplicationCatalog",
            SysProc::UpdateClasses => "@UpdateClasses",
            SysProc::SystemCatalog => "@SystemCatalog",
            SysProc::Statistics => "@Statistics",
            SysProc::Pause => "@Pause",
            SysProc::Resume => "@Resume",
            SysProc::AdHoc => "@AdHoc",
        }
    }

    /// Whether a caller needs the ADMIN permission. Ad hoc work is checked
    /// against SQL permissions instead.
    pub fn requires_admin(self) -> bool {
        !matches!(
            self,
            SysProc::AdHoc | SysProc::SystemCatalog | SysProc::Statistics
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogUpdateArgs {
    /// None keeps the current schema and classes.
    pub catalog: Option<Vec<u8>>,
    /// None keeps the current deployment.
    pub deployment: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassUpdateArgs {
    pub jar: Option<Vec<u8>>,
    pub delete: Vec<ClassPattern>,
}

fn param_error(message: impl Into<String>) -> LivecatError {
    LivecatError::ParameterError(message.into())
}

/// Raw bytes, a hex string, or null. Empty input of either kind is null.
fn optional_bytes(value: &Value, what: &str) -> Result<Option<Vec<u8>>, LivecatError> {
    match value {
        Value::Null => Ok(None),
        Value::Bytes(bytes) if bytes.is_empty() => Ok(None),
        Value::Bytes(bytes) => Ok(Some(bytes.clone())),
        Value::Text(text) if text.trim().is_empty() => Ok(None),
        Value::Text(text) => hex::decode(text.trim())
            .map(Some)
            .map_err(|e| param_error(format!("{what} is not a valid hex string: {e}"))),
        other => Err(param_error(format!(
            "{what} must be a byte array or hex string, not {}",
            other.type_name()
        ))),
    }
}

/// `@UpdateApplicationCatalog(catalog, deployment)`.
pub fn parse_update_application_catalog(
    params: &[Value],
) -> Result<CatalogUpdateArgs, LivecatError> {
    if params.len() != 2 {
        return Err(param_error(format!(
            "UpdateApplicationCatalog system procedure requires exactly two parameters, \
             the catalog bytes and the deployment file, but {} were provided",
            params.len()
        )));
    }
    let catalog = optional_bytes(&params[0], "catalog")?;
    let deployment = match &params[1] {
        Value::Null => None,
        Value::Text(text) if text.trim().is_empty() => None,
        Value::Text(text) => Some(text.clone().into_bytes()),
        Value::Bytes(bytes) if bytes.is_empty() => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        other => {
            return Err(param_error(format!(
                "deployment must be a string or byte array, not {}",
                other.type_name()
            )));
        }
    };
    Ok(CatalogUpdateArgs {
        catalog,
        deployment,
    })
}

/// `@UpdateClasses(jar, delete_patterns)`.
pub fn parse_update_classes(params: &[Value]) -> Result<ClassUpdateArgs, LivecatError> {
    if params.len() != 2 {
        return Err(param_error(
            "UpdateClasses system procedure requires exactly two parameters, \
             the jarfile bytes and the list of classes to delete",
        ));
    }
    let jar = match &params[0] {
        Value::Null => None,
        Value::Bytes(bytes) if bytes.is_empty() => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        Value::Text(_) => optional_bytes(&params[0], "jarfile")?,
        _ => {
            return Err(param_error(
                "UpdateClasses system procedure takes the jarfile bytes as a byte array",
            ));
        }
    };
    let delete = match &params[1] {
        Value::Null => Vec::new(),
        Value::Text(raw) => parse_patterns(raw),
        _ => {
            return Err(param_error(
                "UpdateClasses system procedure takes the list of classes to delete \
                 as a comma-separated string",
            ));
        }
    };
    Ok(ClassUpdateArgs { jar, delete })
}

/// `@SystemCatalog(selector)`; the selector is upper-cased.
pub fn parse_selector(params: &[Value]) -> Result<String, LivecatError> {
    match params {
        [Value::Text(selector)] => Ok(selector.trim().to_ascii_uppercase()),
        _ => Err(param_error(
            "SystemCatalog system procedure requires one string parameter",
        )),
    }
}

/// `@AdHoc(sql)`.
pub fn parse_sql(params: &[Value]) -> Result<String, LivecatError> {
    match params {
        [Value::Text(sql)] if !sql.trim().is_empty() => Ok(sql.clone()),
        _ => Err(param_error(
            "AdHoc system procedure requires exactly one non-empty SQL string",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{SysProc, parse_update_application_catalog, parse_update_classes};
    use crate::catalog::types::Value;

    #[test]
    fn names_round_trip() {
        for proc_ in [
            SysProc::UpdateApplicationCatalog,
            SysProc::UpdateClasses,
            SysProc::SystemCatalog,
            SysProc::Statistics,
            SysProc::Pause,
            SysProc::Resume,
            SysProc::AdHoc,
        ] {
            assert_eq!(SysProc::parse(proc_.name()), Some(proc_));
        }
        assert_eq!(SysProc::parse("UpdateClasses"), None);
        assert_eq!(SysProc::parse("@Shutdown"), None);
    }

    #[test]
    fn catalog_bytes_accept_hex_and_empty() {
        let args = parse_update_application_catalog(&["0a0b".into(), Value::Null])
            .expect("hex");
        assert_eq!(args.catalog, Some(vec![0x0a, 0x0b]));
        assert_eq!(args.deployment, None);

        let args = parse_update_application_catalog(&["".into(), "{}".into()]).expect("empty");
        assert_eq!(args.catalog, None);
        assert_eq!(args.deployment, Some(b"{}".to_vec()));

        assert!(parse_update_application_catalog(&["zz".into(), Value::Null]).is_err());
        assert!(parse_update_application_catalog(&[Value::Null]).is_err());
    }

    #[test]
    fn update_classes_arity_and_types_are_descriptive() {
        let err = parse_update_classes(&[Value::Null]).expect_err("arity");
        assert!(err.to_string().contains("requires exactly two parameters"));

        let err = parse_update_classes(&[Value::Integer(1), Value::Null]).expect_err("jar type");
        assert!(err.to_string().contains("jarfile bytes as a byte array"));

        let err = parse_update_classes(&[Value::Null, Value::Integer(1)]).expect_err("list type");
        assert!(err.to_string().contains("list of classes"));

        let args = parse_update_classes(&[Value::Null, Value::Null]).expect("no-op");
        assert!(args.jar.is_none());
        assert!(args.delete.is_empty());

        let args = parse_update_classes(&[Value::Null, "a.b.*, a.c.Z".into()]).expect("patterns");
        assert_eq!(args.delete.len(), 2);
    }
}
