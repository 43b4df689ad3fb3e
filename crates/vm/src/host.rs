//! Entry points into the sandbox: deploying contract source and invoking
//! exported methods, each under the per-call budget.

use std::time::Duration;

use dvm_types::error::VmError;
use dvm_types::{Address, ContractHash, DvmTransaction, Value};

use crate::contract::{encode_state, Event, LoadedContract, WorkingSet};
use crate::interp::CallContext;
use crate::script;

/// What a successful dispatch produced: the return value (if the method
/// returned one), the events it enqueued, and how many contract instances
/// were active, which feeds the gas meter's depth term.
#[derive(Debug)]
pub struct CallOutcome {
    pub return_value: Option<Value>,
    pub events: Vec<(ContractHash, Event)>,
    pub instance_count: usize,
}

/// The execution host. Stateless apart from its budget configuration; all
/// call state lives in the working set and the per-call context.
#[derive(Debug, Clone)]
pub struct ContractHost {
    timeout: Duration,
}

impl ContractHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Invokes an exported method of a loaded contract. The caller is
    /// responsible for snapshotting the working set beforehand and
    /// reverting it if this returns an error.
    pub fn call(
        &self,
        ws: &mut WorkingSet,
        target: ContractHash,
        method: &str,
        sender: &Address,
        args: Vec<Value>,
        tx: &DvmTransaction,
    ) -> Result<CallOutcome, VmError> {
        let mut ctx = CallContext::new(ws, tx, target, self.timeout);
        let return_value = ctx.invoke(target, method, Some(sender), args, true)?;
        Ok(CallOutcome {
            return_value,
            events: ctx.events,
            instance_count: ctx.instances.len(),
        })
    }

    /// Compiles `source`, installs the new contract in the working set
    /// under `hash`, and runs its constructor if it declares one. Any
    /// failure (compile error, constructor raise, unencodable initial
    /// state) aborts the deployment; the caller reverts the working set.
    pub fn deploy(
        &self,
        ws: &mut WorkingSet,
        hash: ContractHash,
        source: &str,
        sender: &Address,
        args: Vec<Value>,
        tx: &DvmTransaction,
    ) -> Result<CallOutcome, VmError> {
        if ws.contains(&hash) {
            return Err(VmError::Deployment(format!(
                "contract {hash} already exists"
            )));
        }
        let program =
            script::compile(source).map_err(|e| VmError::Deployment(e.to_string()))?;
        let has_constructor = program.method("constructor").is_some();
        ws.insert(LoadedContract::new(hash, program));

        let mut ctx = CallContext::new(ws, tx, hash, self.timeout);
        let return_value = if has_constructor {
            ctx.invoke(hash, "constructor", Some(sender), args, false)
                .map_err(|e| VmError::Deployment(e.to_string()))?
        } else {
            None
        };
        let outcome = CallOutcome {
            return_value,
            events: ctx.events,
            instance_count: ctx.instances.len(),
        };

        // The initial state must be encodable, or the contract is not
        // created at all.
        let contract = ws
            .get(&hash)
            .ok_or_else(|| VmError::Deployment("contract vanished during deploy".to_string()))?;
        encode_state(&contract.variables).map_err(|e| VmError::Deployment(e.to_string()))?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvm_types::ValueMap;
    use rust_decimal::Decimal;

    const TOKEN_SOURCE: &str = r#"
        contract Token

        export fn constructor(sender: str, name: str, ticker: str) {
            self.minter = sender;
            self.name = name;
            self.ticker = ticker;
            self.balances = {};
            self.allowances = {};
        }

        export fn mint(sender: str, address: str, amount: decimal) {
            if sender != self.minter {
                fail "unauthorized";
            }
            assert amount > 0;
            self.balances[address] = get(self.balances, address, 0.0) + amount;
            emit("Mint", {"to": address, "amount": amount});
        }

        export fn transfer(sender: str, receiver: str, amount: decimal) {
            assert sender != receiver, "sender and receiver are equal";
            let balance = get(self.balances, sender, 0.0);
            if balance < amount {
                fail "insufficient funds";
            }
            self.balances[sender] = balance - amount;
            self.balances[receiver] = get(self.balances, receiver, 0.0) + amount;
        }

        export fn supply() {
            return sum(values(self.balances));
        }

        export fn reenter() {
            let me = load_contract(self.address);
            me.supply();
        }

        export fn spin() {
            let i = 0;
            while true {
                i = i + 1;
            }
        }
    "#;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn tx() -> DvmTransaction {
        DvmTransaction::new("aa".repeat(32), vec![])
    }

    fn host() -> ContractHost {
        ContractHost::new(Duration::from_millis(250))
    }

    fn deploy_token(ws: &mut WorkingSet) -> ContractHash {
        let hash = ContractHash::derive(b"block", b"tx", 0);
        host()
            .deploy(
                ws,
                hash,
                TOKEN_SOURCE,
                &Address::new("minter-addr"),
                vec![Value::str("Coin"), Value::str("CN")],
                &tx(),
            )
            .unwrap();
        hash
    }

    #[test]
    fn constructor_populates_state() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let contract = ws.get(&hash).unwrap();
        assert_eq!(
            contract.variables.get("minter"),
            Some(&Value::str("minter-addr"))
        );
        assert_eq!(contract.variables.get("name"), Some(&Value::str("Coin")));
        assert_eq!(contract.variables.get("ticker"), Some(&Value::str("CN")));
        assert_eq!(
            contract.variables.get("balances"),
            Some(&Value::Map(ValueMap::new()))
        );
    }

    #[test]
    fn mint_then_supply() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let outcome = host()
            .call(
                &mut ws,
                hash,
                "mint",
                &Address::new("minter-addr"),
                vec![Value::str("X"), Value::Decimal(dec("100"))],
                &tx(),
            )
            .unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].1.name, "Mint");

        let supply = host()
            .call(&mut ws, hash, "supply", &Address::new("anyone"), vec![], &tx())
            .unwrap();
        assert_eq!(supply.return_value, Some(Value::Decimal(dec("100"))));
    }

    #[test]
    fn string_arguments_coerce_to_decimal() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        host()
            .call(
                &mut ws,
                hash,
                "mint",
                &Address::new("minter-addr"),
                vec![Value::str("X"), Value::str("12.5")],
                &tx(),
            )
            .unwrap();
        let balances = ws.get(&hash).unwrap().variables.get("balances").unwrap();
        assert_eq!(
            balances.as_map().unwrap().get(&Value::str("X")),
            Some(&Value::Decimal(dec("12.5")))
        );
    }

    #[test]
    fn unauthorized_mint_fails() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let err = host()
            .call(
                &mut ws,
                hash,
                "mint",
                &Address::new("stranger"),
                vec![Value::str("X"), Value::Decimal(dec("1"))],
                &tx(),
            )
            .unwrap_err();
        assert!(matches!(err, VmError::Execution(ref m) if m == "unauthorized"));
    }

    #[test]
    fn transfer_insufficient_funds_fails() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        host()
            .call(
                &mut ws,
                hash,
                "mint",
                &Address::new("minter-addr"),
                vec![Value::str("X"), Value::Decimal(dec("30"))],
                &tx(),
            )
            .unwrap();
        let err = host()
            .call(
                &mut ws,
                hash,
                "transfer",
                &Address::new("X"),
                vec![Value::str("Y"), Value::Decimal(dec("50"))],
                &tx(),
            )
            .unwrap_err();
        assert!(matches!(err, VmError::Execution(ref m) if m == "insufficient funds"));
    }

    #[test]
    fn argument_type_mismatch_is_rejected() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let err = host()
            .call(
                &mut ws,
                hash,
                "mint",
                &Address::new("minter-addr"),
                vec![Value::str("X"), Value::Bool(true)],
                &tx(),
            )
            .unwrap_err();
        assert!(matches!(err, VmError::ArgumentType { index: 3, .. }));
    }

    #[test]
    fn self_reentry_is_rejected() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let err = host()
            .call(&mut ws, hash, "reenter", &Address::new("anyone"), vec![], &tx())
            .unwrap_err();
        assert!(matches!(err, VmError::Reentrancy(h) if h == hash));
    }

    #[test]
    fn tight_loop_hits_the_budget() {
        let mut ws = WorkingSet::new();
        let hash = deploy_token(&mut ws);
        let fast_host = ContractHost::new(Duration::from_millis(5));
        let err = fast_host
            .call(&mut ws, hash, "spin", &Address::new("anyone"), vec![], &tx())
            .unwrap_err();
        assert!(matches!(err, VmError::Timeout));
    }

    #[test]
    fn private_methods_are_not_callable_externally() {
        let mut ws = WorkingSet::new();
        let hash = ContractHash::derive(b"block", b"tx", 1);
        host()
            .deploy(
                &mut ws,
                hash,
                "contract C\nfn hidden() { return 1; }\nexport fn visible() { return hidden(); }\n",
                &Address::new("a"),
                vec![],
                &tx(),
            )
            .unwrap();
        let err = host()
            .call(&mut ws, hash, "hidden", &Address::new("a"), vec![], &tx())
            .unwrap_err();
        assert!(matches!(err, VmError::UnknownMethod(_)));

        let ok = host()
            .call(&mut ws, hash, "visible", &Address::new("a"), vec![], &tx())
            .unwrap();
        assert_eq!(ok.return_value, Some(Value::int(1)));
    }

    #[test]
    fn cross_contract_call_injects_caller_as_sender() {
        let mut ws = WorkingSet::new();
        let token = deploy_token(&mut ws);

        let caller = ContractHash::derive(b"block", b"tx", 3);
        let caller_source = format!(
            r#"
            contract Caller

            export fn poke(sender: str) {{
                let other = load_contract("{token}");
                other.mint("Z", 5.0);
            }}
            "#
        );
        host()
            .deploy(
                &mut ws,
                caller,
                &caller_source,
                &Address::new("a"),
                vec![],
                &tx(),
            )
            .unwrap();

        // The token's minter is "minter-addr", so a cross-contract mint is
        // unauthorized: the injected sender is the caller contract's hash.
        let err = host()
            .call(&mut ws, caller, "poke", &Address::new("a"), vec![], &tx())
            .unwrap_err();
        assert!(matches!(err, VmError::Execution(ref m) if m == "unauthorized"));

        // Depth metering saw both instances.
        let mut ws2 = WorkingSet::new();
        let token2 = deploy_token(&mut ws2);
        let reader = ContractHash::derive(b"block", b"tx", 4);
        let reader_source = format!(
            r#"
            contract Reader

            export fn peek(sender: str) {{
                let other = load_contract("{token2}");
                let total = other.supply();
                self.seen = total;
            }}
            "#
        );
        host()
            .deploy(&mut ws2, reader, &reader_source, &Address::new("a"), vec![], &tx())
            .unwrap();
        let outcome = host()
            .call(&mut ws2, reader, "peek", &Address::new("a"), vec![], &tx())
            .unwrap();
        assert_eq!(outcome.instance_count, 2);
    }

    #[test]
    fn compound_assignment_updates_state_slots() {
        let mut ws = WorkingSet::new();
        let hash = ContractHash::derive(b"block", b"tx", 11);
        host()
            .deploy(
                &mut ws,
                hash,
                r#"
                contract Counter

                export fn constructor(sender: str) {
                    self.count = 0;
                    self.tally = {"a": 10};
                }

                export fn bump() {
                    self.count += 3;
                    self.count -= 1;
                    self.tally["a"] += 5;
                }
                "#,
                &Address::new("a"),
                vec![],
                &tx(),
            )
            .unwrap();
        host()
            .call(&mut ws, hash, "bump", &Address::new("a"), vec![], &tx())
            .unwrap();
        let vars = &ws.get(&hash).unwrap().variables;
        assert_eq!(vars.get("count"), Some(&Value::int(2)));
        assert_eq!(
            vars.get("tally").unwrap().as_map().unwrap().get(&Value::str("a")),
            Some(&Value::int(15))
        );
    }

    #[test]
    fn deploy_rejects_bad_source() {
        let mut ws = WorkingSet::new();
        let hash = ContractHash::derive(b"block", b"tx", 9);
        let err = host()
            .deploy(&mut ws, hash, "contract {", &Address::new("a"), vec![], &tx())
            .unwrap_err();
        assert!(matches!(err, VmError::Deployment(_)));
    }

    #[test]
    fn failed_constructor_reports_deployment_failure() {
        let mut ws = WorkingSet::new();
        let hash = ContractHash::derive(b"block", b"tx", 10);
        let err = host()
            .deploy(
                &mut ws,
                hash,
                "contract C\nexport fn constructor(sender: str) { fail \"nope\"; }\n",
                &Address::new("a"),
                vec![],
                &tx(),
            )
            .unwrap_err();
        assert!(matches!(err, VmError::Deployment(_)));
    }
}
