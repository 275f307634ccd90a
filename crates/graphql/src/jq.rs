//! Compiling and running jq programs against JSON field values.

use jaq_interpret::FilterT;

/// A compiled jq program, reusable across invocations.
pub(crate) struct Filter(jaq_interpret::Filter);

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("parsing jq program: {0}")]
    Parse(String),
    #[error("running jq program: {0}")]
    Eval(String),
}

/// Compile `program` against the jq core and standard library.
pub(crate) fn compile(program: &str) -> Result<Filter, Error> {
    let mut definitions = jaq_interpret::ParseCtx::new(Vec::new());
    definitions.insert_natives(jaq_core::core());
    definitions.insert_defs(jaq_std::std());

    let (main, errs) = jaq_parse::parse(program, jaq_parse::main());
    if !errs.is_empty() {
        return Err(Error::Parse(format!("{errs:?}")));
    }
    let Some(main) = main else {
        return Err(Error::Parse("empty program".to_string()));
    };

    let filter = definitions.compile(main);
    if !definitions.errs.is_empty() {
        return Err(Error::Parse(
            "program references undefined names".to_string(),
        ));
    }
    Ok(Filter(filter))
}

/// Run a compiled program over one input value. A single output is returned
/// as-is; zero or many outputs are returned as an array.
pub(crate) fn run(filter: &Filter, input: serde_json::Value) -> Result<serde_json::Value, Error> {
    let inputs = jaq_interpret::RcIter::new(core::iter::empty());
    let ctx = jaq_interpret::Ctx::new(Vec::new(), &inputs);

    let mut outputs = Vec::new();
    for output in filter.0.run((ctx, jaq_interpret::Val::from(input))) {
        let output = output.map_err(|err| Error::Eval(err.to_string()))?;
        outputs.push(serde_json::Value::from(output));
    }
    Ok(if outputs.len() == 1 {
        outputs.pop().unwrap()
    } else {
        serde_json::Value::Array(outputs)
    })
}
