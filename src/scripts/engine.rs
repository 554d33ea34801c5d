//! Rhai-backed [`ScriptEngine`].
//!
//! Sources compile once into ASTs; every execution gets a fresh engine and
//! scope with the input bound to `param` and the script's final expression
//! as its result. Three host helpers mirror what device transforms need:
//! `binary_to_num`, `num_to_binary` and `from_json`.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use rhai::{Blob, Dynamic, Engine, ImmutableString, Scope, AST};

use super::{ScriptEngine, ScriptError, ScriptValue, EXECUTE_DEADLINE};

pub struct RhaiEngine {
    fns: RwLock<HashMap<String, AST>>,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self {
            fns: RwLock::new(HashMap::new()),
        }
    }

    fn build_engine() -> Engine {
        let mut engine = Engine::new();
        register_helpers(&mut engine);

        let start = Instant::now();
        engine.on_progress(move |_| {
            if start.elapsed() > EXECUTE_DEADLINE {
                Some("execution deadline exceeded".into())
            } else {
                None
            }
        });

        engine
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for RhaiEngine {
    fn add(&self, name: &str, source: &str) -> Result<(), ScriptError> {
        let engine = Self::build_engine();
        let ast = engine.compile(source).map_err(|e| ScriptError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        self.fns.write().insert(name.to_string(), ast);
        Ok(())
    }

    fn execute(&self, name: &str, value: ScriptValue) -> Result<ScriptValue, ScriptError> {
        let ast = self
            .fns
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::NotFound(name.to_string()))?;

        let engine = Self::build_engine();
        let mut scope = Scope::new();
        scope.push_dynamic("param", to_dynamic(value));

        let out: Dynamic = engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ScriptError::Runtime {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        from_dynamic(out)
    }
}

fn to_dynamic(value: ScriptValue) -> Dynamic {
    match value {
        ScriptValue::Null => Dynamic::UNIT,
        ScriptValue::Bool(b) => Dynamic::from(b),
        ScriptValue::Int(i) => Dynamic::from(i),
        ScriptValue::Float(f) => Dynamic::from(f),
        ScriptValue::Str(s) => Dynamic::from(s),
        ScriptValue::Bytes(b) => Dynamic::from_blob(b),
        ScriptValue::List(items) => {
            Dynamic::from_array(items.into_iter().map(to_dynamic).collect())
        }
        ScriptValue::Map(map) => {
            let mut out = rhai::Map::new();
            for (k, v) in map {
                out.insert(k.into(), to_dynamic(v));
            }
            Dynamic::from_map(out)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Result<ScriptValue, ScriptError> {
    if value.is_unit() {
        return Ok(ScriptValue::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(ScriptValue::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(ScriptValue::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(ScriptValue::Float(f));
    }

    if value.is::<ImmutableString>() {
        return Ok(ScriptValue::Str(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<Blob>() {
        return Ok(ScriptValue::Bytes(value.cast::<Blob>()));
    }
    if value.is::<rhai::Array>() {
        return value
            .cast::<rhai::Array>()
            .into_iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>, _>>()
            .map(ScriptValue::List);
    }
    if value.is::<rhai::Map>() {
        let mut out = std::collections::BTreeMap::new();
        for (k, v) in value.cast::<rhai::Map>() {
            out.insert(k.to_string(), from_dynamic(v)?);
        }
        return Ok(ScriptValue::Map(out));
    }

    Err(ScriptError::Value(value.type_name().to_string()))
}

fn byte_order(endian: &str) -> Result<bool, Box<rhai::EvalAltResult>> {
    match endian {
        "little" => Ok(true),
        "big" => Ok(false),
        other => Err(format!("little or big endian allowed, but given: {other}").into()),
    }
}

fn check_width(width: i64) -> Result<usize, Box<rhai::EvalAltResult>> {
    match width {
        16 | 32 | 64 => Ok(width as usize / 8),
        other => Err(format!("16, 32 or 64 width allowed, but given: {other}").into()),
    }
}

fn decode_num(bytes: &[u8], endian: &str, width: i64) -> Result<i64, Box<rhai::EvalAltResult>> {
    let little = byte_order(endian)?;
    let len = check_width(width)?;

    if bytes.len() < len {
        return Err(format!(
            "binary should have length at least {len}, but has {}",
            bytes.len()
        )
        .into());
    }

    let num = match (len, little) {
        (2, true) => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        (2, false) => u16::from_be_bytes([bytes[0], bytes[1]]) as i64,
        (4, true) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        (4, false) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        (8, true) => u64::from_le_bytes(bytes[..8].try_into().expect("length checked")) as i64,
        (8, false) => u64::from_be_bytes(bytes[..8].try_into().expect("length checked")) as i64,
        _ => unreachable!("width checked"),
    };

    Ok(num)
}

fn encode_num(num: i64, endian: &str, width: i64) -> Result<Blob, Box<rhai::EvalAltResult>> {
    let little = byte_order(endian)?;
    let len = check_width(width)?;

    let bytes = match (len, little) {
        (2, true) => (num as u16).to_le_bytes().to_vec(),
        (2, false) => (num as u16).to_be_bytes().to_vec(),
        (4, true) => (num as u32).to_le_bytes().to_vec(),
        (4, false) => (num as u32).to_be_bytes().to_vec(),
        (8, true) => (num as u64).to_le_bytes().to_vec(),
        (8, false) => (num as u64).to_be_bytes().to_vec(),
        _ => unreachable!("width checked"),
    };

    Ok(bytes)
}

fn register_helpers(engine: &mut Engine) {
    // blob input, defaulting endian to little and width to 32
    engine.register_fn("binary_to_num", |b: Blob| decode_num(&b, "little", 32));
    engine.register_fn("binary_to_num", |b: Blob, endian: ImmutableString| {
        decode_num(&b, &endian, 32)
    });
    engine.register_fn(
        "binary_to_num",
        |b: Blob, endian: ImmutableString, width: i64| decode_num(&b, &endian, width),
    );

    // string input, for values that were never base64
    engine.register_fn("binary_to_num", |s: ImmutableString| {
        decode_num(s.as_bytes(), "little", 32)
    });
    engine.register_fn(
        "binary_to_num",
        |s: ImmutableString, endian: ImmutableString, width: i64| {
            decode_num(s.as_bytes(), &endian, width)
        },
    );

    engine.register_fn("num_to_binary", |n: i64| encode_num(n, "little", 32));
    engine.register_fn("num_to_binary", |n: i64, endian: ImmutableString| {
        encode_num(n, &endian, 32)
    });
    engine.register_fn(
        "num_to_binary",
        |n: i64, endian: ImmutableString, width: i64| encode_num(n, &endian, width),
    );

    engine.register_fn("from_json", |s: ImmutableString| {
        match serde_json::from_str::<serde_json::Value>(&s) {
            Ok(v) => to_dynamic(ScriptValue::from_json(v)),
            Err(_) => Dynamic::UNIT,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_a_number() {
        let engine = RhaiEngine::new();
        engine.add("read.p", "param * 2").unwrap();

        let out = engine.execute("read.p", ScriptValue::Int(10)).unwrap();
        assert_eq!(out, ScriptValue::Int(20));
    }

    #[test]
    fn unknown_function_fails() {
        let engine = RhaiEngine::new();
        let err = engine.execute("read.x", ScriptValue::Null).unwrap_err();
        assert!(matches!(err, ScriptError::NotFound(_)));
    }

    #[test]
    fn compile_error_surfaces() {
        let engine = RhaiEngine::new();
        assert!(matches!(
            engine.add("bad", "param +"),
            Err(ScriptError::Compile { .. })
        ));
    }

    #[test]
    fn binary_to_num_little_endian() {
        let engine = RhaiEngine::new();
        engine.add("t", "binary_to_num(param)").unwrap();

        let bytes = 152u32.to_le_bytes().to_vec();
        let out = engine.execute("t", ScriptValue::Bytes(bytes)).unwrap();
        assert_eq!(out, ScriptValue::Int(152));
    }

    #[test]
    fn binary_to_num_big_endian_width() {
        let engine = RhaiEngine::new();
        engine
            .add("t", r#"binary_to_num(param, "big", 16)"#)
            .unwrap();

        let out = engine
            .execute("t", ScriptValue::Bytes(vec![0x01, 0x02]))
            .unwrap();
        assert_eq!(out, ScriptValue::Int(0x0102));
    }

    #[test]
    fn binary_to_num_short_input_errors() {
        let engine = RhaiEngine::new();
        engine.add("t", "binary_to_num(param)").unwrap();

        let err = engine
            .execute("t", ScriptValue::Bytes(vec![1, 2]))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }

    #[test]
    fn num_to_binary_roundtrip() {
        let engine = RhaiEngine::new();
        engine
            .add("t", r#"binary_to_num(num_to_binary(param, "big", 64), "big", 64)"#)
            .unwrap();

        let out = engine.execute("t", ScriptValue::Int(99_000)).unwrap();
        assert_eq!(out, ScriptValue::Int(99_000));
    }

    #[test]
    fn from_json_parses_maps() {
        let engine = RhaiEngine::new();
        engine.add("t", r#"from_json(param)"#).unwrap();

        let out = engine
            .execute("t", ScriptValue::Str(r#"{"test":true,"value":1}"#.into()))
            .unwrap();

        let ScriptValue::Map(map) = out else {
            panic!("expected map, got {out:?}");
        };
        assert_eq!(map.get("test"), Some(&ScriptValue::Bool(true)));
        assert_eq!(map.get("value"), Some(&ScriptValue::Int(1)));
    }

    #[test]
    fn from_json_bad_input_is_null() {
        let engine = RhaiEngine::new();
        engine.add("t", r#"from_json("{broken")"#).unwrap();

        let out = engine.execute("t", ScriptValue::Null).unwrap();
        assert_eq!(out, ScriptValue::Null);
    }

    #[test]
    fn map_in_map_out() {
        let engine = RhaiEngine::new();
        engine
            .add("t", "#{ doubled: param.value * 2 }")
            .unwrap();

        let mut input = std::collections::BTreeMap::new();
        input.insert("value".to_string(), ScriptValue::Int(4));

        let out = engine.execute("t", ScriptValue::Map(input)).unwrap();
        let ScriptValue::Map(map) = out else {
            panic!("expected map");
        };
        assert_eq!(map.get("doubled"), Some(&ScriptValue::Int(8)));
    }
}
