//! Lowering of a [`TraceFile`] into a [`Graph`].

use std::collections::HashMap;

use popcanon_ir::{
    Attribute, ElementType, Graph, Handle, ListElem, NodeKind, Shape, TensorConstant, TensorMeta,
    Value, ValueType,
};

use crate::{AttrDecl, NodeDecl, TensorDecl, TensorLiteral, Trace, TraceError, TraceFile};

/// Parse a trace dtype name (`Float`, `Half`, `Long`, `HalfOrFloat`, ...).
pub fn parse_type_name(name: &str) -> Result<ElementType, TraceError> {
    ElementType::from_trace_name(name).ok_or_else(|| TraceError::UnknownDtype(name.into()))
}

/// Parse a value type as written in a trace, e.g. `Float(2, 3)`, `Half(*)`,
/// `int`, `Tensor[]` or `None`.
pub fn parse_type(text: &str) -> Result<ValueType, TraceError> {
    let text = text.trim();
    let invalid = || TraceError::InvalidType(text.into());
    match text {
        "None" => return Ok(ValueType::None),
        "int" => return Ok(ValueType::Scalar(ElementType::Int64)),
        "float" => return Ok(ValueType::Scalar(ElementType::Float32)),
        "bool" => return Ok(ValueType::Scalar(ElementType::Bool)),
        _ => {}
    }
    if let Some(elem) = text.strip_suffix("[]") {
        let elem = match elem {
            "int" => ListElem::Int,
            "float" => ListElem::Float,
            "bool" => ListElem::Bool,
            "Tensor" => ListElem::Tensor,
            _ => return Err(invalid()),
        };
        return Ok(ValueType::List(elem));
    }
    if let Some(inner) = text.strip_prefix("scalar<").and_then(|t| t.strip_suffix('>')) {
        return Ok(ValueType::Scalar(parse_type_name(inner)?));
    }

    let (name, rest) = text.split_once('(').ok_or_else(invalid)?;
    let dims = rest.strip_suffix(')').ok_or_else(invalid)?.trim();
    let elem = ElementType::from_trace_name(name.trim()).ok_or_else(invalid)?;
    let shape = match dims {
        "*" => Shape::Unknown,
        "" => Shape::scalar(),
        dims => Shape::Known(
            dims.split(',')
                .map(|d| d.trim().parse::<usize>().map_err(|_| invalid()))
                .collect::<Result<_, _>>()?,
        ),
    };
    Ok(ValueType::Tensor { elem, shape })
}

pub(crate) fn lower_trace(file: &TraceFile) -> Result<Trace, TraceError> {
    let mut cx = Lowerer::default();

    for decl in &file.inputs {
        let ty = parse_type(&decl.ty)?;
        let v = cx.graph.add_input(ty, decl.name.clone());
        cx.define(&decl.name, v)?;
    }
    for decl in &file.parameters {
        let ty = parse_type(&decl.ty)?;
        let v = cx.graph.add_parameter(ty, decl.name.clone());
        cx.define(&decl.name, v)?;
    }
    for node in &file.nodes {
        cx.lower_node(node)?;
    }
    for name in &file.outputs {
        let v = cx.lookup(name)?;
        cx.graph.register_output(v);
    }
    cx.graph.verify()?;

    Ok(Trace {
        graph: cx.graph,
        input_tensors: lower_metas(&file.input_tensors)?,
        parameter_tensors: lower_metas(&file.parameter_tensors)?,
    })
}

fn lower_metas(decls: &[TensorDecl]) -> Result<Vec<TensorMeta>, TraceError> {
    decls
        .iter()
        .map(|d| Ok(TensorMeta::new(parse_type_name(&d.dtype)?, &d.shape)))
        .collect()
}

#[derive(Default)]
struct Lowerer {
    graph: Graph,
    scope: HashMap<String, Handle<Value>>,
}

impl Lowerer {
    fn define(&mut self, name: &str, value: Handle<Value>) -> Result<(), TraceError> {
        if self.scope.insert(name.to_string(), value).is_some() {
            return Err(TraceError::DuplicateValue(name.into()));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Handle<Value>, TraceError> {
        self.scope
            .get(name)
            .copied()
            .ok_or_else(|| TraceError::UnknownValue(name.into()))
    }

    fn lower_node(&mut self, decl: &NodeDecl) -> Result<(), TraceError> {
        let kind = NodeKind::parse(&decl.kind)?;
        let inputs = decl
            .inputs
            .iter()
            .map(|name| self.lookup(name))
            .collect::<Result<Vec<_>, _>>()?;
        let types = decl
            .outputs
            .iter()
            .map(|o| parse_type(&o.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let attrs = decl
            .attrs
            .iter()
            .map(|(name, attr)| Ok((name.clone(), lower_attr(name, attr)?)))
            .collect::<Result<Vec<_>, TraceError>>()?;

        let node = self.graph.insert_node(kind, inputs, types);
        let n = self.graph.node_mut(node);
        n.provenance.clone_from(&decl.provenance);
        for (name, attr) in attrs {
            n.set_attr(name, attr);
        }

        let outputs = self.graph.node(node).outputs().to_vec();
        for (decl, v) in decl.outputs.iter().zip(outputs) {
            self.graph.set_value_name(v, decl.name.clone());
            self.define(&decl.name, v)?;
        }
        Ok(())
    }
}

fn lower_attr(name: &str, attr: &AttrDecl) -> Result<Attribute, TraceError> {
    Ok(match attr {
        AttrDecl::Int(v) => Attribute::Int(*v),
        AttrDecl::Float(v) => Attribute::Float(*v),
        AttrDecl::Ints(v) => Attribute::Ints(v.clone()),
        AttrDecl::Floats(v) => Attribute::Floats(v.clone()),
        AttrDecl::Str(v) => Attribute::Str(v.clone()),
        AttrDecl::Tensor(t) => Attribute::Tensor(lower_tensor(name, t)?),
    })
}

fn lower_tensor(name: &str, t: &TensorLiteral) -> Result<TensorConstant, TraceError> {
    let elem = parse_type_name(&t.dtype)?;
    if elem.is_float() {
        return Ok(TensorConstant::from_f64(elem, t.shape.clone(), &t.values)?);
    }
    let ints = t
        .values
        .iter()
        .map(|&v| {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(TraceError::Attribute {
                    name: name.into(),
                    message: format!("{v} is not a valid {elem} element"),
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TensorConstant::from_i64(elem, t.shape.clone(), &ints)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_types() {
        assert_eq!(
            parse_type("Float(2, 3)").unwrap(),
            ValueType::tensor(ElementType::Float32, &[2, 3])
        );
        assert_eq!(
            parse_type("HalfOrFloat(4)").unwrap(),
            ValueType::tensor(ElementType::HalfOrFloat, &[4])
        );
        assert_eq!(
            parse_type("Half(*)").unwrap(),
            ValueType::tensor_unranked(ElementType::Float16)
        );
        assert_eq!(parse_type("Long()").unwrap(), ValueType::tensor(ElementType::Int64, &[]));
    }

    #[test]
    fn host_types() {
        assert_eq!(parse_type("int").unwrap(), ValueType::Scalar(ElementType::Int64));
        assert_eq!(parse_type("float").unwrap(), ValueType::Scalar(ElementType::Float32));
        assert_eq!(parse_type("bool").unwrap(), ValueType::Scalar(ElementType::Bool));
        assert_eq!(parse_type("scalar<Int>").unwrap(), ValueType::Scalar(ElementType::Int32));
        assert_eq!(parse_type("int[]").unwrap(), ValueType::List(ListElem::Int));
        assert_eq!(parse_type("Tensor[]").unwrap(), ValueType::List(ListElem::Tensor));
        assert_eq!(parse_type("None").unwrap(), ValueType::None);
    }

    #[test]
    fn types_print_the_way_they_parse() {
        for text in ["Float(2, 3)", "Half(*)", "Bool()", "int", "float[]", "scalar<Byte>", "None"] {
            assert_eq!(parse_type(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn malformed_types() {
        for text in ["Float", "Float(2, x)", "Double(2)", "list[]", "Float(2", "scalar<Quad>"] {
            assert!(parse_type(text).is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn integer_tensor_literal_rejects_fractions() {
        let t = TensorLiteral {
            dtype: "Long".into(),
            shape: vec![2],
            values: vec![1.0, 2.5],
        };
        assert!(matches!(lower_tensor("value", &t), Err(TraceError::Attribute { .. })));
    }

    #[test]
    fn tensor_literal_length_is_checked() {
        let t = TensorLiteral {
            dtype: "Float".into(),
            shape: vec![3],
            values: vec![1.0],
        };
        assert!(matches!(lower_tensor("value", &t), Err(TraceError::Ir(_))));
    }
}
