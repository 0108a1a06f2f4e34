//! Type descriptors and method signatures.
//!
//! Descriptors follow the runtime's canonical grammar: one letter per
//! primitive, `Lpkg/Cls;` for classes and a `[` prefix per array dimension.
//! A method signature is `(` + parameter descriptors + `)` + return descriptor.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

/// Internal name of `java.lang.String`.
pub const STRING_CLASS: &str = "java/lang/String";

/// Internal name of `java.lang.Object`.
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// A field or parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Only valid as a return type.
    Void,
    /// Class type, holding the slash-delimited internal name.
    Object(String),
    /// Array of the element type.
    Array(Box<JavaType>),
}

/// Value category used to pick the runtime's typed call entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl JavaType {
    /// The `java.lang.String` type.
    pub fn string() -> Self {
        JavaType::Object(STRING_CLASS.to_string())
    }

    /// A class type from a dotted or slash-delimited class name.
    pub fn class(name: &str) -> Self {
        JavaType::Object(class_name_to_internal(name))
    }

    /// An array type with the given element type.
    pub fn array_of(element: JavaType) -> Self {
        JavaType::Array(Box::new(element))
    }

    /// Returns the canonical descriptor text.
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            JavaType::Boolean => out.push('Z'),
            JavaType::Byte => out.push('B'),
            JavaType::Char => out.push('C'),
            JavaType::Short => out.push('S'),
            JavaType::Int => out.push('I'),
            JavaType::Long => out.push('J'),
            JavaType::Float => out.push('F'),
            JavaType::Double => out.push('D'),
            JavaType::Void => out.push('V'),
            JavaType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            JavaType::Array(element) => {
                out.push('[');
                element.write_descriptor(out);
            }
        }
    }

    /// Returns the value category for this type.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            JavaType::Boolean => ValueKind::Boolean,
            JavaType::Byte => ValueKind::Byte,
            JavaType::Char => ValueKind::Char,
            JavaType::Short => ValueKind::Short,
            JavaType::Int => ValueKind::Int,
            JavaType::Long => ValueKind::Long,
            JavaType::Float => ValueKind::Float,
            JavaType::Double => ValueKind::Double,
            JavaType::Void => ValueKind::Void,
            JavaType::Object(_) | JavaType::Array(_) => ValueKind::Object,
        }
    }

    /// Returns true for class and array types.
    pub fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_) | JavaType::Array(_))
    }

    /// Returns true if this is `java.lang.String`.
    pub fn is_string(&self) -> bool {
        matches!(self, JavaType::Object(name) if name == STRING_CLASS)
    }

    /// Parses exactly one field or parameter descriptor. `V` is rejected;
    /// void only appears as a method's return type.
    pub fn parse(descriptor: &str) -> BridgeResult<Self> {
        let mut parser = Parser::new(descriptor);
        let ty = parser.parse_type()?;
        if ty == JavaType::Void {
            return Err(parser.error("void is only valid as a return type"));
        }
        if !parser.at_end() {
            return Err(parser.error("trailing characters after type"));
        }
        Ok(ty)
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for JavaType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JavaType::parse(s)
    }
}

/// A parsed method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub params: Vec<JavaType>,
    pub ret: JavaType,
}

impl MethodSignature {
    /// Creates a signature from parameter and return types.
    pub fn new(params: Vec<JavaType>, ret: JavaType) -> Self {
        Self { params, ret }
    }

    /// Parses a `(params)ret` signature.
    pub fn parse(signature: &str) -> BridgeResult<Self> {
        let mut parser = Parser::new(signature);
        parser.expect('(')?;
        let mut params = Vec::new();
        while parser.peek() != Some(')') {
            if parser.at_end() {
                return Err(parser.error("unterminated parameter list"));
            }
            let param = parser.parse_type()?;
            if param == JavaType::Void {
                return Err(parser.error("void is not a parameter type"));
            }
            params.push(param);
        }
        parser.expect(')')?;
        let ret = parser.parse_type()?;
        if !parser.at_end() {
            return Err(parser.error("trailing characters after return type"));
        }
        Ok(Self { params, ret })
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Returns the canonical signature text.
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for p in &self.params {
            p.write_descriptor(&mut out);
        }
        out.push(')');
        self.ret.write_descriptor(&mut out);
        out
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for MethodSignature {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodSignature::parse(s)
    }
}

/// Converts `java.lang.String` into `java/lang/String`.
///
/// Already-internal names pass through unchanged.
pub fn class_name_to_internal(name: &str) -> String {
    name.replace('.', "/")
}

/// Converts `java/lang/String` into `java.lang.String`.
pub fn internal_to_class_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Converts a class name into its field descriptor (`Ljava/lang/String;`).
pub fn class_descriptor(name: &str) -> String {
    format!("L{};", class_name_to_internal(name))
}

/// Returns the package portion of a dotted class name ("" for the default
/// package). Nested class suffixes are kept with their outer class.
pub fn package_of(class_name: &str) -> String {
    let dotted = internal_to_class_name(class_name);
    match dotted.rfind('.') {
        Some(i) => dotted[..i].to_string(),
        None => String::new(),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, want: char) -> BridgeResult<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", want))),
        }
    }

    fn error(&self, message: &str) -> BridgeError {
        BridgeError::invalid_signature(self.text, format!("{} at offset {}", message, self.pos))
    }

    fn parse_type(&mut self) -> BridgeResult<JavaType> {
        let c = self
            .bump()
            .ok_or_else(|| self.error("unexpected end of signature"))?;
        Ok(match c {
            'Z' => JavaType::Boolean,
            'B' => JavaType::Byte,
            'C' => JavaType::Char,
            'S' => JavaType::Short,
            'I' => JavaType::Int,
            'J' => JavaType::Long,
            'F' => JavaType::Float,
            'D' => JavaType::Double,
            'V' => JavaType::Void,
            'L' => {
                let rest = &self.text[self.pos..];
                let end = rest
                    .find(';')
                    .ok_or_else(|| self.error("unterminated class name"))?;
                if end == 0 {
                    return Err(self.error("empty class name"));
                }
                let name = rest[..end].to_string();
                self.pos += end + 1;
                JavaType::Object(name)
            }
            '[' => {
                let element = self.parse_type()?;
                if element == JavaType::Void {
                    return Err(self.error("array of void"));
                }
                JavaType::Array(Box::new(element))
            }
            other => return Err(self.error(&format!("unknown type code '{}'", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_primitive_signature() {
        let sig = MethodSignature::parse("(IJZ)D").unwrap();
        assert_eq!(
            sig.params,
            vec![JavaType::Int, JavaType::Long, JavaType::Boolean]
        );
        assert_eq!(sig.ret, JavaType::Double);
        assert_eq!(sig.arity(), 3);
    }

    #[test]
    fn test_parse_object_and_array_signature() {
        let sig =
            MethodSignature::parse("(Ljava/lang/String;[I[[Ljava/lang/Object;)[Ljava/lang/String;")
                .unwrap();
        assert_eq!(sig.params[0], JavaType::string());
        assert_eq!(sig.params[1], JavaType::array_of(JavaType::Int));
        assert_eq!(
            sig.params[2],
            JavaType::array_of(JavaType::array_of(JavaType::class("java.lang.Object")))
        );
        assert_eq!(sig.ret, JavaType::array_of(JavaType::string()));
        assert_eq!(
            sig.descriptor(),
            "(Ljava/lang/String;[I[[Ljava/lang/Object;)[Ljava/lang/String;"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(MethodSignature::parse("I)V").is_err());
        assert!(MethodSignature::parse("(I").is_err());
        assert!(MethodSignature::parse("(Ljava/lang/String)V").is_err());
        assert!(MethodSignature::parse("(V)V").is_err());
        assert!(MethodSignature::parse("()Q").is_err());
        assert!(MethodSignature::parse("()VV").is_err());
        assert!(JavaType::parse("[V").is_err());
    }

    #[test]
    fn test_void_is_not_a_field_type() {
        let err = JavaType::parse("V").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSignature { .. }));
        assert!("V".parse::<JavaType>().is_err());
        assert_eq!(JavaType::parse("I").unwrap(), JavaType::Int);
        assert_eq!(MethodSignature::parse("()V").unwrap().ret, JavaType::Void);
    }

    #[test]
    fn test_class_name_conversion() {
        assert_eq!(class_name_to_internal("java.lang.String"), "java/lang/String");
        assert_eq!(class_name_to_internal("java/lang/String"), "java/lang/String");
        assert_eq!(class_descriptor("java.util.List"), "Ljava/util/List;");
        assert_eq!(internal_to_class_name("a/b/C$D"), "a.b.C$D");
        assert_eq!(package_of("com.example.sub.Widget"), "com.example.sub");
        assert_eq!(package_of("Widget"), "");
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(JavaType::string().value_kind(), ValueKind::Object);
        assert_eq!(JavaType::array_of(JavaType::Int).value_kind(), ValueKind::Object);
        assert_eq!(JavaType::Char.value_kind(), ValueKind::Char);
        assert!(JavaType::string().is_string());
        assert!(!JavaType::class("java.lang.Object").is_string());
    }
}
