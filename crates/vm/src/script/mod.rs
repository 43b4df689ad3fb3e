//! The restricted contract-script front-end.
//!
//! A source file declares one contract and any number of methods:
//!
//! ```text
//! contract Token
//!
//! export fn constructor(sender: str, name: str, ticker: str) {
//!     self.minter = sender;
//!     self.name = name;
//!     self.ticker = ticker;
//!     self.balances = {};
//! }
//!
//! export fn mint(sender: str, address: str, amount: decimal) {
//!     assert sender == self.minter, "unauthorized";
//!     assert amount > 0;
//!     self.balances[address] = get(self.balances, address, 0.0) + amount;
//! }
//! ```
//!
//! `export fn` methods are callable from the outside; plain `fn` (or
//! `private fn`) only from within the same contract. Parameter kinds are
//! mandatory and name the eight value kinds. Compilation rejects writes to
//! reserved names, duplicate methods, and methods shadowing the reserved
//! vocabulary.

mod ast;
mod parser;
mod token;

use std::collections::BTreeMap;
use std::sync::Arc;

use dvm_types::error::VmError;
use dvm_types::is_reserved_name;

pub use ast::{BinOp, Expr, Method, Param, Stmt, UnOp};

/// A compiled contract: its declared name and method table. Immutable
/// after compilation; shared by every instance loaded from the same
/// source.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub contract_name: String,
    pub methods: BTreeMap<String, Method>,
}

impl Program {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn exported(&self, name: &str) -> Option<&Method> {
        self.methods.get(name).filter(|m| m.exported)
    }
}

/// Compiles contract source into a [`Program`].
pub fn compile(source: &str) -> Result<Arc<Program>, VmError> {
    let tokens = token::tokenize(source)?;
    let (contract_name, methods) = parser::Parser::new(tokens).parse_program()?;

    let mut table = BTreeMap::new();
    for method in methods {
        if is_reserved_name(&method.name) {
            return Err(VmError::Compile(format!(
                "method `{}` shadows a reserved name",
                method.name
            )));
        }
        for param in &method.params {
            if is_reserved_name(&param.name) {
                return Err(VmError::Compile(format!(
                    "parameter `{}` of `{}` is a reserved name",
                    param.name, method.name
                )));
            }
        }
        check_body(&method.name, &method.body)?;
        if table.insert(method.name.clone(), method).is_some() {
            return Err(VmError::Compile("duplicate method name".to_string()));
        }
    }
    Ok(Arc::new(Program {
        contract_name,
        methods: table,
    }))
}

/// Statically rejects writes to reserved names: assignments to
/// `self.<reserved>`, and `let`/`for` bindings that would shadow one.
fn check_body(method: &str, body: &[Stmt]) -> Result<(), VmError> {
    fn assign_root(expr: &Expr) -> Option<&str> {
        match expr {
            Expr::Attr(base, name) if matches!(**base, Expr::This) => Some(name),
            Expr::Index(base, _) => assign_root(base),
            _ => None,
        }
    }
    for stmt in body {
        match stmt {
            Stmt::Let(name, _) | Stmt::For { var: name, .. } if is_reserved_name(name) => {
                return Err(VmError::Compile(format!(
                    "`{name}` is reserved and cannot be bound in `{method}`"
                )));
            }
            Stmt::Assign(target, _) => {
                if let Some(name) = assign_root(target) {
                    if is_reserved_name(name) {
                        return Err(VmError::Compile(format!(
                            "`{name}` is reserved and cannot be written in `{method}`"
                        )));
                    }
                }
            }
            Stmt::If { then, els, .. } => {
                check_body(method, then)?;
                check_body(method, els)?;
            }
            Stmt::While { body, .. } => check_body(method, body)?,
            Stmt::For { var, body, .. } => {
                if is_reserved_name(var) {
                    return Err(VmError::Compile(format!(
                        "`{var}` is reserved and cannot be bound in `{method}`"
                    )));
                }
                check_body(method, body)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvm_types::ValueKind;

    #[test]
    fn compiles_a_token_contract() {
        let program = compile(
            r#"
            contract Token

            export fn constructor(sender: str, name: str, ticker: str) {
                self.minter = sender;
                self.name = name;
                self.ticker = ticker;
                self.balances = {};
            }

            export fn supply() {
                return sum(values(self.balances));
            }

            fn helper(x: int) {
                return x + 1;
            }
            "#,
        )
        .unwrap();

        assert_eq!(program.contract_name, "Token");
        assert_eq!(program.methods.len(), 3);
        let ctor = program.method("constructor").unwrap();
        assert!(ctor.exported);
        assert_eq!(ctor.params.len(), 3);
        assert_eq!(ctor.params[0].name, "sender");
        assert_eq!(ctor.params[0].kind, ValueKind::Str);
        assert!(program.exported("helper").is_none());
        assert!(program.method("helper").is_some());
    }

    #[test]
    fn rejects_reserved_method_names() {
        let err = compile("contract C\nexport fn emit() { return; }\n").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn rejects_writes_to_reserved_state() {
        for body in [
            "self.address = \"x\";",
            "self.transaction = 1;",
            "self.block[0] = 1;",
            "let deploy = 1;",
        ] {
            let src = format!("contract C\nexport fn m() {{ {body} }}\n");
            assert!(compile(&src).is_err(), "accepted: {body}");
        }
    }

    #[test]
    fn rejects_duplicate_methods() {
        let err = compile(
            "contract C\nexport fn m() { return; }\nexport fn m() { return; }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_second_contract_declaration() {
        assert!(compile("contract A\ncontract B\n").is_err());
    }

    #[test]
    fn rejects_unknown_parameter_kind() {
        assert!(compile("contract C\nexport fn m(x: float) { return; }\n").is_err());
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        assert!(compile("contract C\nexport fn m() { 1 + 2 = 3; }\n").is_err());
    }
}
