/// Expression language integration tests: parsing, evaluation against a
/// host context, writing, and the context utilities.

use std::cell::Cell;
use std::rc::Rc;

use storylet_engine::core::context::{
    dump_context, eval_expression, init_context, update_context, ContextError, ContextExpr,
};
use storylet_engine::{
    Context, EvalError, ParseError, Parser, StringFormat, UpdateMap, Value, Writer,
};

fn eval(text: &str, ctx: &Context) -> Result<Value, EvalError> {
    Parser::new().parse(text).unwrap().evaluate(ctx, None)
}

fn game_context() -> Context {
    let mut ctx = Context::new();
    ctx.set_value("day", 3);
    ctx.set_value("player", "ash");
    ctx.set_value("has_key", true);
    ctx.set_function("max", 2, |args| {
        let a = args[0].to_number().unwrap_or(0.0);
        let b = args[1].to_number().unwrap_or(0.0);
        Value::Number(a.max(b))
    });
    ctx.set_function("greeting", 1, |args| {
        Value::String(format!("hello {}", args[0].to_text()))
    });
    ctx
}

#[test]
fn division_by_zero_and_unknown_names() {
    let ctx = Context::new();
    assert_eq!(eval("5/0", &ctx), Err(EvalError::DivisionByZero));
    assert_eq!(
        eval("unknown_var", &ctx),
        Err(EvalError::UndefinedVariable("unknown_var".to_string()))
    );
}

#[test]
fn writer_omits_unneeded_parentheses() {
    let expr = Parser::new().parse("1+2*3").unwrap();
    assert_eq!(Writer::default().write(&expr), "1 + 2 * 3");
}

#[test]
fn host_functions_and_variables() {
    let ctx = game_context();
    assert_eq!(eval("max(day, 7) - 1", &ctx).unwrap(), Value::Number(6.0));
    assert_eq!(
        eval("greeting(player) == 'hello ash'", &ctx).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(eval("has_key and day >= 3", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(eval("TRUE == has_key", &ctx).unwrap(), Value::Bool(true));
    assert!(matches!(
        eval("max(1, 2, 3)", &ctx),
        Err(EvalError::ArityMismatch { expected: 2, found: 3, .. })
    ));
}

#[test]
fn short_circuit_never_calls_the_right_side() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let mut ctx = Context::new();
    ctx.set_function("touch", 0, move |_| {
        counter.set(counter.get() + 1);
        Value::Bool(true)
    });

    assert_eq!(eval("false and touch()", &ctx).unwrap(), Value::Bool(false));
    assert_eq!(eval("1 || touch()", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(calls.get(), 0);

    assert_eq!(eval("true && touch()", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(calls.get(), 1);
}

#[test]
fn call_trace_lists_arguments() {
    let ctx = game_context();
    let expr = Parser::new().parse("not max(day, -2) < 1").unwrap();
    let mut trace = Vec::new();
    let result = expr.evaluate(&ctx, Some(&mut trace)).unwrap();

    assert_eq!(result, Value::Bool(true));
    assert_eq!(
        trace,
        vec![
            "Fetching variable: day -> 3",
            "Number: 2",
            "Evaluated: - 2 = -2",
            "Called function: max(3, -2) = 3",
            "Evaluated: not 3 = false",
            "Number: 1",
            "Evaluated: false < 1 = true",
        ]
    );
}

#[test]
fn round_trip_with_every_string_format() {
    let ctx = game_context();
    let parser = Parser::new();
    let sources = [
        "greeting(player) != 'hello bob' and not (day > 4 or day < 1)",
        "max(day, 2) * (day - 1) / 2",
        "-(day - 10) >= 7 == has_key",
        "player = \"ash\"",
        "49 * (1 / 49) == 1",
        "day * (day / 7) / (2 * day)",
        "greeting(\"o'neil\") != 'hello'",
    ];

    for format in [StringFormat::SingleQuote, StringFormat::DoubleQuote] {
        let writer = Writer::new(format);
        for text in sources {
            let original = parser.parse(text).unwrap();
            let written = writer.write(&original);
            let reparsed = parser.parse(&written).unwrap();
            assert_eq!(
                original.evaluate(&ctx, None).unwrap(),
                reparsed.evaluate(&ctx, None).unwrap(),
                "'{}' was written as '{}'",
                text,
                written
            );
            assert_eq!(original.specificity(), reparsed.specificity());
        }
    }
}

#[test]
fn syntax_errors_are_positioned() {
    let parser = Parser::new();
    assert!(matches!(
        parser.parse("day > 3 )"),
        Err(ParseError::TrailingInput { position: 8, .. })
    ));
    assert!(matches!(
        parser.parse("day $ 3"),
        Err(ParseError::UnrecognizedToken { position: 4, .. })
    ));
    assert!(matches!(parser.parse("max(1,"), Err(ParseError::UnexpectedEnd)));
}

#[test]
fn context_initialise_then_update() {
    let mut ctx = game_context();
    let init: UpdateMap =
        serde_json::from_str(r#"{"gold": 5, "rich": "gold > 100", "title": "'squire'"}"#).unwrap();
    let mut trace = Vec::new();
    init_context(&mut ctx, &init, Some(&mut trace)).unwrap();
    assert_eq!(trace[0], "InitContext: Evaluating gold = 5");

    let updates = UpdateMap::parse_pairs(&[("gold", "gold * 30"), ("rich", "gold > 100")]).unwrap();
    update_context(&mut ctx, &updates, None).unwrap();
    assert_eq!(ctx.value("gold").unwrap(), Value::Number(150.0));
    assert_eq!(ctx.value("rich").unwrap(), Value::Bool(true));

    assert!(matches!(
        init_context(&mut ctx, &init, None),
        Err(ContextError::AlreadyExists(ref name)) if name == "gold"
    ));
}

#[test]
fn eval_expression_passes_literals_through() {
    let ctx = Context::new();
    assert_eq!(
        eval_expression(&ContextExpr::from(2.5), &ctx, None).unwrap(),
        Value::Number(2.5)
    );
    let expr = ContextExpr::parse("'a' == 'a'").unwrap();
    assert_eq!(eval_expression(&expr, &ctx, None).unwrap(), Value::Bool(true));
}

#[test]
fn computed_variables_track_their_inputs() {
    let mut ctx = game_context();
    ctx.set_expression("weekend", "day >= 6").unwrap();
    assert_eq!(eval("not weekend", &ctx).unwrap(), Value::Bool(true));

    ctx.set_value("day", 6);
    assert_eq!(eval("not weekend", &ctx).unwrap(), Value::Bool(false));
    assert!(dump_context(&ctx).contains("weekend = true"));
}
