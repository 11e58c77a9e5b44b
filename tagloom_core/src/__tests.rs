use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use rstest::rstest;
use similar_asserts::assert_eq;
use tracing_test::traced_test;

use super::__fixtures::*;
use super::*;
use crate::slots::SlotRegistry;

fn error_kind(error: &TagloomError) -> &'static str {
	match error.root_cause() {
		TagloomError::Lexical { .. } => "lexical",
		TagloomError::UnexpectedEnd { .. } => "unexpected_end",
		TagloomError::Evaluation { .. } => "evaluation",
		TagloomError::FunctionNotFound { .. } => "function_not_found",
		TagloomError::FunctionCall { .. } => "function_call",
		TagloomError::XmlParse { .. } => "xml_parse",
		_ => "other",
	}
}

fn people() -> ScopeStack {
	universe(vec![
		(
			"user",
			map(vec![
				("name", Value::from("Ada")),
				("tags", Value::from(vec!["x", "y"])),
			]),
		),
		("total", Value::from(12)),
	])
}

#[rstest]
#[case::precedence("2+3*4", Value::from(14))]
#[case::parentheses("(2+3)*4", Value::from(20))]
#[case::leading_sign("-3+5", Value::from(2))]
#[case::sign_after_operator("2--3", Value::from(5))]
#[case::sign_after_multiply("2*-3", Value::from(-6))]
#[case::division("10/4", Value::from(2.5))]
#[case::left_associative_subtraction("7-2-1", Value::from(4))]
#[case::left_associative_division("8/2/2", Value::from(2))]
#[case::leading_dot_number(".5+1", Value::from(1.5))]
#[case::concatenation("'a'+1", Value::from("a1"))]
#[case::numeric_strings("'1'+'2'", Value::from(3))]
#[case::escaped_quote(r#""it\"s""#, Value::from("it\"s"))]
#[case::keyword_true("true", Value::from(true))]
#[case::keyword_null("null", Value::Null)]
#[case::empty("", Value::Null)]
#[case::blank("   ", Value::Null)]
#[case::variadic_call("concat('a', 'b', 'c')", Value::from("abc"))]
#[case::sign_after_comma("concat(1,-2)", Value::from("1-2"))]
#[case::nested_calls("upper(concat('a', lower('B')))", Value::from("AB"))]
#[case::if_else("if(0, 'yes', 'no')", Value::from("no"))]
#[case::round("round(2.567, 2)", Value::from(2.57))]
#[case::format_number("format_number(1234567.891, 2)", Value::from("1,234,567.89"))]
#[case::format_number_separators("format_number(1234.5, 1, ',', '.')", Value::from("1.234,5"))]
#[case::substr("substr('template', 1, 3)", Value::from("emp"))]
#[case::substr_from_end("substr('template', -3)", Value::from("ate"))]
#[case::loose_equality("eq(1, '1')", Value::from(true))]
#[case::string_ordering("lt('a', 'b')", Value::from(true))]
#[case::htmlentities("htmlentities('<b>')", Value::from("&lt;b&gt;"))]
#[case::default("default('', 'fallback')", Value::from("fallback"))]
fn evaluates_literals(#[case] expression: &str, #[case] expected: Value) -> TagloomResult<()> {
	let result = evaluate(expression, &ScopeStack::new())?;
	assert_eq!(result, expected);

	Ok(())
}

#[rstest]
#[case::absolute("/user/name", Value::from("Ada"))]
#[case::scoped("user/name", Value::from("Ada"))]
#[case::list_index("user/tags/1", Value::from("y"))]
#[case::spaced_division("total / 2", Value::from(6))]
#[case::missing("user/missing/deep", Value::Null)]
#[case::missing_root("nobody", Value::Null)]
#[case::count("count(user/tags)", Value::from(2))]
#[case::arithmetic_on_path("total*2+1", Value::from(25))]
#[case::concatenate_path("'Hi ' + user/name", Value::from("Hi Ada"))]
fn evaluates_paths(#[case] expression: &str, #[case] expected: Value) -> TagloomResult<()> {
	let result = evaluate(expression, &people())?;
	assert_eq!(result, expected);

	Ok(())
}

#[rstest]
#[case::two_operands("1 2", "evaluation")]
#[case::dangling_operator("1 +", "evaluation")]
#[case::comma_outside_call("1,2", "evaluation")]
#[case::empty_argument("concat(1,)", "evaluation")]
#[case::unbalanced_close("1)", "evaluation")]
#[case::division_by_zero("4/0", "evaluation")]
#[case::unterminated_string("'abc", "unexpected_end")]
#[case::unclosed_parenthesis("(1+2", "unexpected_end")]
#[case::unclosed_call("concat(", "unexpected_end")]
#[case::lone_parenthesis("(", "unexpected_end")]
#[case::unclosed_after_operator("(1+", "unexpected_end")]
#[case::unknown_character("1 # 2", "lexical")]
#[case::second_decimal_point("1.2.3", "lexical")]
#[case::unknown_function("nope(1)", "function_not_found")]
#[case::wrong_arity("substr('a')", "function_call")]
#[case::malformed_island("xml('<a><b></a>')", "xml_parse")]
#[case::xpath_below_text("xpath('<a/>', '/a/text()/b')", "function_call")]
#[case::xpath_without_document("xpath(1, '/a')", "function_call")]
fn rejects_malformed_expressions(#[case] expression: &str, #[case] expected: &str) {
	let error = evaluate(expression, &ScopeStack::new()).unwrap_err();
	assert_eq!(error_kind(&error), expected);
}

#[test]
fn lexical_error_reports_position() {
	let error = evaluate("1 # 2", &ScopeStack::new()).unwrap_err();
	assert!(matches!(
		error,
		TagloomError::Lexical {
			character: '#',
			position: 2,
			..
		}
	));
}

#[test]
fn inner_layers_shadow_outer_layers() -> TagloomResult<()> {
	let mut scope = universe(vec![("x", Value::from(0))]);
	scope.push(map(vec![("x", Value::from(1))]));
	scope.push(map(vec![("x", Value::from(2)), ("y", Value::from(3))]));

	assert_eq!(evaluate("x", &scope)?, Value::from(2));
	assert_eq!(evaluate("./x", &scope)?, Value::from(2));
	assert_eq!(evaluate("../x", &scope)?, Value::from(1));
	assert_eq!(evaluate("/x", &scope)?, Value::from(0));
	assert_eq!(scope.merged().get("y"), Some(&Value::from(3)));

	scope.pop();
	assert_eq!(evaluate("x", &scope)?, Value::from(1));
	assert_eq!(evaluate("y", &scope)?, Value::Null);

	Ok(())
}

#[test]
fn universe_layer_is_never_popped() {
	let mut scope = universe(vec![("x", Value::from(1))]);
	scope.push(Value::from(2));

	assert!(scope.pop().is_some());
	assert!(scope.pop().is_none());
	assert_eq!(scope.depth(), 1);
	assert_eq!(scope.lookup("x"), Some(Value::from(1)));
	assert_eq!(scope.lookup(".."), None);
}

#[rstest]
#[case::accessor("title", Value::from("Weaving"))]
#[case::field("slug", Value::from("weaving"))]
#[case::dynamic("meta_author", Value::from("author"))]
#[case::missing("missing", Value::Null)]
#[case::nested_accessor("article/title", Value::from("Weaving"))]
fn resolves_host_objects(#[case] expression: &str, #[case] expected: Value) -> TagloomResult<()> {
	let article = || {
		Value::object(Article {
			title: "Weaving".to_string(),
			slug: "weaving".to_string(),
		})
	};
	let mut scope = universe(vec![("article", article())]);
	scope.push(article());

	assert_eq!(evaluate(expression, &scope)?, expected);

	Ok(())
}

#[rstest]
#[case::integer(Value::from(3), "3")]
#[case::fraction(Value::from(2.5), "2.5")]
#[case::boolean(Value::from(true), "true")]
#[case::null(Value::Null, "")]
#[case::list(Value::from(vec![1, 2]), "1,2")]
fn formats_output_values(#[case] value: Value, #[case] expected: &str) {
	assert_eq!(value.to_output_string(), expected);
}

#[test]
fn folds_inert_documents_into_text() -> TagloomResult<()> {
	let source = r#"<html><body><p class="a">Hi</p></body></html>"#;

	let folded = build(source, true)?;
	assert!(folded.tree.is_empty());
	assert_eq!(folded.tree.root, Some(Child::Text(source.to_string())));

	let unfolded = build(source, false)?;
	assert_eq!(unfolded.tree.len(), 3);
	assert!(!unfolded.tree.is_empty());

	Ok(())
}

#[test]
fn folding_keeps_dynamic_elements() -> TagloomResult<()> {
	let template = build(
		r#"<div><p>static</p><p tl:cond="show">dyn</p><p class="{x}">y</p></div>"#,
		true,
	)?;

	assert_eq!(template.tree.len(), 3);
	let root = template.tree.node(NodeId(0));
	assert_eq!(root.children, vec![
		Child::Text("<p>static</p>".to_string()),
		Child::Node(NodeId(1)),
		Child::Node(NodeId(2)),
	]);

	Ok(())
}

#[test]
fn records_self_closing_markup() -> TagloomResult<()> {
	let template = build("<div><br/><p></p></div>", false)?;

	assert!(!template.tree.node(NodeId(0)).self_closing);
	assert!(template.tree.node(NodeId(1)).self_closing);
	assert!(!template.tree.node(NodeId(2)).self_closing);

	Ok(())
}

#[rstest]
#[case::plain(r#"<div class="x"><p>One</p><br/><span>two</span></div>"#)]
#[case::entities(r#"<p title="Tom &amp; Jerry">x &amp; y</p>"#)]
#[case::loop_with_indent("<ul>\n\t<li tl:walk=\"/items\"><b>item</b> <tl:val value=\".\"/></li>\n</ul>")]
#[case::mixed(r#"<div><img src="a.png"/><p></p><tl:val value="count(items)"/></div>"#)]
#[case::declared_prefix(
	r#"<div xmlns:t="urn:tagloom"><t:val value="1"/><p t:cond="1"><em>kept</em></p></div>"#
)]
#[case::nested_mute(r#"<div><section tl:mute="1"><h1>Title</h1></section></div>"#)]
fn folding_does_not_change_output(#[case] source: &str) -> TagloomResult<()> {
	let data = || vec![("items", Value::from(vec!["a", "b"]))];
	let folded = render_configured(source, EngineConfig::default(), data())?;
	let unfolded = render_configured(source, unfolded(), data())?;

	assert_eq!(folded, unfolded);

	Ok(())
}

#[test]
fn declared_prefix_replaces_default() -> TagloomResult<()> {
	let template = build(
		r#"<root xmlns:x="urn:tagloom" x:trans="site"><p x:cond="1">a</p><tl:val value="1"/></root>"#,
		true,
	)?;

	assert_eq!(template.prefix, "x:");
	assert_eq!(template.default_trans_source.as_deref(), Some("site"));
	assert!(template.tree.node(NodeId(0)).attributes.is_empty());

	let output = render(
		r#"<root xmlns:x="urn:tagloom" x:trans="site"><p x:cond="1">a</p><tl:val value="1"/></root>"#,
	)?;
	assert_eq!(output, r#"<root><p>a</p><tl:val value="1"/></root>"#);

	Ok(())
}

#[rstest]
#[case::mismatched_end("<a><b></a>")]
#[case::two_roots("<a/><b/>")]
#[case::text_outside_root("text<a/>")]
#[case::unclosed("<a>")]
#[case::no_root("")]
fn rejects_malformed_documents(#[case] source: &str) {
	let error = build(source, true).unwrap_err();
	assert_eq!(error_kind(&error), "xml_parse");
}

#[test]
fn parse_errors_name_the_innermost_element() {
	let error = build("<root>\n<child>\n</root>", true).unwrap_err();
	let TagloomError::XmlParse { message, file, .. } = error else {
		panic!("expected a parse error");
	};

	assert!(message.contains("Last element: child(2)"), "{message}");
	assert_eq!(file, "test.xml");
}

#[test]
fn missing_required_attribute_fails_the_build() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(
		dir.path(),
		"page.xml",
		"<html>\n  <body>\n    <tl:include/>\n  </body>\n</html>",
	);

	let mut view = View::default();
	view.load_file(&page)?;
	let error = view.render().unwrap_err();

	let TagloomError::RequiredAttribute {
		tag,
		line,
		attribute,
		file,
	} = error
	else {
		panic!("expected a required attribute error");
	};
	assert_eq!(tag, "tl:include");
	assert_eq!(line, 3);
	assert_eq!(attribute, "file");
	assert_eq!(file, page.display().to_string());

	Ok(())
}

#[test]
fn interpolates_and_escapes_attributes() -> TagloomResult<()> {
	let output = render_with(
		r#"<a href="/u/{id}" title="{name}">x</a>"#,
		vec![("id", Value::from(7)), ("name", Value::from("Tom & \"Jerry\""))],
	)?;

	assert_eq!(
		output,
		r#"<a href="/u/7" title="Tom &amp; &quot;Jerry&quot;">x</a>"#
	);

	Ok(())
}

#[test]
fn walk_repeats_with_indentation() -> TagloomResult<()> {
	let output = render_with(
		"<ul>\n  <li tl:walk=\"/items\"><tl:val value=\".\"/></li>\n</ul>",
		vec![("items", Value::from(vec!["a", "b", "c"]))],
	)?;

	assert_eq!(output, "<ul>\n  <li>a</li>\n  <li>b</li>\n  <li>c</li>\n</ul>");

	Ok(())
}

#[rstest]
#[case::map_keys(
	r#"<dl><dt tl:walk="/langs"><tl:val value="key()"/>=<tl:val value="."/></dt></dl>"#,
	"<dl><dt>en=English</dt><dt>fr=French</dt></dl>"
)]
#[case::count(
	r#"<p><i tl:walk="3"><tl:val value="position()"/></i></p>"#,
	"<p><i>1</i><i>2</i><i>3</i></p>"
)]
#[case::last_skipped(
	r#"<p><i tl:walk="/items" tl:cond="not(last())"><tl:val value="."/></i></p>"#,
	"<p><i>a</i><i>b</i></p>"
)]
#[case::odd_rows(
	r#"<p><i tl:walk="/items" class="{if(odd(), 'odd', 'even')}"><tl:val value="."/></i></p>"#,
	r#"<p><i class="odd">a</i><i class="even">b</i><i class="odd">c</i></p>"#
)]
#[case::empty_list(r#"<p><i tl:walk="/none">x</i></p>"#, "<p></p>")]
fn walks_collections(#[case] source: &str, #[case] expected: &str) -> TagloomResult<()> {
	let output = render_with(source, vec![
		("items", Value::from(vec!["a", "b", "c"])),
		(
			"langs",
			map(vec![
				("en", Value::from("English")),
				("fr", Value::from("French")),
			]),
		),
		("none", Value::List(Vec::new())),
	])?;

	assert_eq!(output, expected);

	Ok(())
}

#[test]
fn walk_indents_only_between_rendered_items() -> TagloomResult<()> {
	let output = render_with(
		"<ul>\n  <li tl:walk=\"/items\" tl:cond=\"not(first())\"><tl:val value=\".\"/></li>\n</ul>",
		vec![("items", Value::from(vec!["a", "b", "c"]))],
	)?;

	assert_eq!(output, "<ul>\n  <li>b</li>\n  <li>c</li>\n</ul>");

	Ok(())
}

#[rstest]
#[case::overflowing_count("9999999999*9999999999")]
#[case::beyond_limit("1000001")]
fn rejects_oversized_walk_counts(#[case] expression: &str) {
	let source = format!(r#"<p><i tl:walk="{expression}">x</i></p>"#);
	let error = render(&source).unwrap_err();

	assert_eq!(error_kind(&error), "evaluation");
}

#[rstest]
#[case::cond(
	r#"<div><p tl:cond="show">yes</p><p tl:cond="not(show)">no</p></div>"#,
	"<div><p>yes</p></div>"
)]
#[case::text_mute_void(
	r#"<div><p tl:text="upper('hi')">ignored</p><span tl:mute="1">inner</span><input tl:void="1" name="q"/></div>"#,
	r#"<div><p>HI</p>inner<input name="q"></div>"#
)]
#[case::attr(
	r##"<div><a href="#"><tl:attr name="class" value="'active'"/><tl:attr name="hidden" flag="0"/><tl:attr name="disabled" flag="1"/>link</a></div>"##,
	r##"<div><a href="#" class="active" hidden="" disabled>link</a></div>"##
)]
#[case::attr_falsy_flag_uses_value(
	r##"<a href="#"><tl:attr name="class" flag="0" value="'v'"/>x</a>"##,
	r##"<a href="#" class="v">x</a>"##
)]
#[case::attr_with_text(
	r#"<p tl:text="'body'"><tl:attr name="id">  main
	  block </tl:attr></p>"#,
	r#"<p id="main block">body</p>"#
)]
#[case::macros(
	r#"<div><span tl:macro="badge" class="badge"><tl:val value="label"/></span><p tl:call="badge" label="'New'"/><p tl:call="badge"><tl:param name="label">Old</tl:param></p></div>"#,
	r#"<div><span class="badge">New</span><span class="badge">Old</span></div>"#
)]
#[case::doctype(
	r#"<html tl:doctype="html"><body/></html>"#,
	"<!doctype html>\n<html><body/></html>"
)]
#[case::mount_expression(
	r#"<div><tl:mount target="greeting" value="'hi ' + name"/><tl:val value="/greeting"/></div>"#,
	"<div>hi Ada</div>"
)]
#[case::mount_children(
	r#"<div><tl:mount target="motto">weave</tl:mount><tl:val value="upper(motto)"/></div>"#,
	"<div>WEAVE</div>"
)]
#[case::unescaped_val(
	r#"<div><tl:val value="'&lt;b&gt;' + name"/></div>"#,
	"<div><b>Ada</div>"
)]
fn renders_directives(#[case] source: &str, #[case] expected: &str) -> TagloomResult<()> {
	let output = render_with(source, vec![
		("show", Value::from(true)),
		("name", Value::from("Ada")),
	])?;

	assert_eq!(output, expected);

	Ok(())
}

#[test]
fn unknown_macro_is_an_error() {
	let error = render(r#"<div tl:call="missing"/>"#).unwrap_err();

	assert!(matches!(
		error.root_cause(),
		TagloomError::MacroNotFound { name } if name == "missing"
	));
}

#[test]
fn render_errors_name_the_failing_element() {
	let error = render("<div>\n<p tl:cond=\"1 +\">x</p>\n</div>").unwrap_err();

	assert_eq!(error_kind(&error), "evaluation");
	let TagloomError::Rendering {
		tag, file, line, ..
	} = error
	else {
		panic!("expected a rendering error");
	};
	assert_eq!(tag, "p");
	assert_eq!(file, STRING_SOURCE);
	assert_eq!(line, 2);
}

#[rstest]
#[case::default_kept(r#"<div><p tl:slot="s">Default</p></div>"#, "<div><p>Default</p></div>")]
#[case::replaced(
	r#"<div><p tl:slot="s">Default</p><i tl:plug="s">X</i></div>"#,
	"<div><i>X</i></div>"
)]
#[case::plug_before_slot(
	r#"<div><i tl:plug="s">X</i><p tl:slot="s">Default</p></div>"#,
	"<div><i>X</i></div>"
)]
#[case::appended(
	r#"<div><p tl:slot="s">Default</p><b tl:plug="s" tl:append="true" tl:mute="1">A</b><b tl:plug="s" tl:append="true" tl:mute="1">B</b></div>"#,
	"<div>AB</div>"
)]
#[case::replace_after_append(
	r#"<div><p tl:slot="s">Default</p><b tl:plug="s" tl:append="true" tl:mute="1">A</b><b tl:plug="s" tl:mute="1">B</b></div>"#,
	"<div>B</div>"
)]
#[case::duplicate_slot(
	r#"<div><p tl:slot="s">One</p><p tl:slot="s">Two</p><i tl:plug="s" tl:mute="1">X</i></div>"#,
	"<div>X<p>Two</p></div>"
)]
fn reconciles_slots(#[case] source: &str, #[case] expected: &str) -> TagloomResult<()> {
	assert_eq!(render(source)?, expected);

	Ok(())
}

#[test]
fn plug_replaces_slot_body() {
	let mut slots = SlotRegistry::new();
	let anchor = slots.record_slot("a").unwrap();
	slots.set_length("a", 3);
	slots.queue_plug("a", "NEW", false);

	assert_eq!(slots.reconcile(format!("x{anchor}def y")), "xNEW y");
}

#[test]
fn plugs_may_carry_other_anchors() {
	let mut slots = SlotRegistry::new();
	let first = slots.record_slot("first").unwrap();
	let second = slots.record_slot("second").unwrap();
	slots.queue_plug("first", "ONE", false);
	slots.queue_plug("second", format!("[{first}]"), false);

	assert_eq!(slots.reconcile(format!("<{second}>")), "<[ONE]>");
}

#[test]
fn unmatched_anchor_leaves_output_unchanged() {
	let mut slots = SlotRegistry::new();
	slots.record_slot("gone");
	slots.queue_plug("gone", "X", false);

	assert_eq!(slots.reconcile("plain".to_string()), "plain");
	assert_eq!(slots.plugs("gone").len(), 1);
}

#[test]
fn included_templates_plug_host_slots() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(
		dir.path(),
		"page.xml",
		r#"<html><head><title tl:slot="title">Default</title></head><body><tl:include file="parts/content.xml"/></body></html>"#,
	);
	write_file(
		dir.path(),
		"parts/content.xml",
		r#"<section><title tl:plug="title">Plugged</title><p>Body</p></section>"#,
	);

	let mut view = View::default();
	view.load_file(&page)?;

	assert_eq!(
		view.render()?,
		"<html><head><title>Plugged</title></head><body><section><p>Body</p></section></body></html>"
	);

	Ok(())
}

#[test]
fn include_depth_is_limited() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(
		dir.path(),
		"a.xml",
		r#"<div><tl:include file="a.xml"/></div>"#,
	);

	let mut view = View::new(EngineConfig {
		max_include_depth: 3,
		..EngineConfig::default()
	});
	view.load_file(&page)?;
	let error = view.render().unwrap_err();

	assert!(matches!(
		error.root_cause(),
		TagloomError::IncludeDepth { limit: 3, .. }
	));

	Ok(())
}

#[test]
fn cdata_copies_file_verbatim() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	write_file(dir.path(), "snippet.txt", "<raw & unescaped>");
	let page = write_file(
		dir.path(),
		"page.xml",
		r#"<pre><tl:cdata file="snippet.txt"/></pre>"#,
	);

	let mut view = View::default();
	view.load_file(&page)?;

	assert_eq!(view.render()?, "<pre><raw & unescaped></pre>");

	Ok(())
}

#[test]
fn custom_functions_take_precedence() -> TagloomResult<()> {
	let mut view = View::default();
	view.register_function_factory(FunctionMap::new().with("greet", greet).with("upper", shout));
	view.load_string(r#"<p><tl:val value="greet(name)"/> <tl:val value="upper('x')"/></p>"#);
	view.mount("name", "Ada");

	assert_eq!(view.render()?, "<p>Hello Ada X!</p>");

	Ok(())
}

#[rstest]
#[case::implicit_root(
	"\n  <node1>value1</node1>\n  <node2>value2</node2>\n",
	"xpath(xml(/doc), '/xml/node1')"
)]
#[case::explicit_root(
	"\n  <node1>value1</node1>\n  <node2>value2</node2>\n",
	"xpath(xml(/doc, 'explicit'), '/explicit/node1')"
)]
#[case::own_root(
	"\n  <myroot>\n    <node1>value1</node1>\n    <node2>value2</node2>\n  </myroot>\n",
	"xpath(xml(/doc), '/myroot/node1')"
)]
fn queries_mounted_xml_islands(#[case] island: &str, #[case] expression: &str) -> TagloomResult<()> {
	let source = format!(
		r#"<div><tl:mount target="doc">{island}</tl:mount><p tl:mute="1" tl:text="{expression}"/></div>"#
	);

	assert_eq!(render(&source)?, "<div>value1</div>");

	Ok(())
}

#[test]
fn invalid_xml_island_is_a_parse_error() {
	let error = render(
		r#"<div><tl:mount target="doc"><![CDATA[
  <node1>value1
  <node2>value2</node2>
]]></tl:mount><p tl:mute="1" tl:text="xpath(xml(/doc), '/xml/node1')"/></div>"#,
	)
	.unwrap_err();

	assert_eq!(error_kind(&error), "xml_parse");
}

#[rstest]
#[case::descendants("xpath(xml('<a><b>1</b><c><b>2</b></c></a>'), '//b')", Value::from(vec!["1", "2"]))]
#[case::position("xpath(xml('<a><b>1</b><b>2</b></a>'), '/a/b[2]')", Value::from("2"))]
#[case::attribute(r#"xpath(xml('<a><b id="x">1</b></a>'), '/a/b/@id')"#, Value::from("x"))]
#[case::attribute_filter(
	r#"xpath(xml('<a><b id="x">1</b><b id="y">2</b></a>'), "/a/b[@id='y']")"#,
	Value::from("2")
)]
#[case::text_nodes("xpath(xml('<a>hi<b/>there</a>'), '/a/text()')", Value::from(vec!["hi", "there"]))]
#[case::nested_text("xpath(xml('<a><b>x<i>y</i></b></a>'), '/a/b')", Value::from("xy"))]
#[case::entities("xpath(xml('<a>&amp;&#65;</a>'), '/a')", Value::from("&A"))]
#[case::no_match("xpath(xml('<a/>'), '/a/b')", Value::Null)]
#[case::string_document("xpath('<b>1</b><b>2</b>', '/xml/b[1]')", Value::from("1"))]
fn queries_xml_documents(#[case] expression: &str, #[case] expected: Value) -> TagloomResult<()> {
	assert_eq!(evaluate(expression, &ScopeStack::new())?, expected);

	Ok(())
}

#[test]
fn xml_documents_expose_their_root() -> TagloomResult<()> {
	let document = XmlDocument::parse_island("<item>one</item><item>two</item>", None)?;
	let scope = universe(vec![("doc", document.into())]);

	assert_eq!(evaluate("doc/root", &scope)?, Value::from("xml"));
	assert_eq!(evaluate("doc/text", &scope)?, Value::from("onetwo"));

	Ok(())
}

#[test]
fn feeds_mount_their_result() -> TagloomResult<()> {
	let mut view = View::default();
	view.register_feed_factory(NumbersFactory);
	view.load_string(
		r#"<ul><tl:feed class="numbers" count="3" target="nums"/><li tl:walk="/nums"><tl:val value="."/></li></ul>"#,
	);

	assert_eq!(view.render()?, "<ul><li>1</li><li>2</li><li>3</li></ul>");
	assert!(view.merged_data().get("nums").is_none());

	Ok(())
}

#[test]
fn unknown_feed_is_an_error() {
	let error = render(r#"<div><tl:feed class="nope"/></div>"#).unwrap_err();

	assert!(matches!(
		error.root_cause(),
		TagloomError::FeedNotFound { class } if class == "nope"
	));
}

#[rstest]
#[case::translated(true, "<p>bonjour monde</p>")]
#[case::untranslated(false, "<p>Hello world</p>")]
fn translates_content(#[case] with_translator: bool, #[case] expected: &str) -> TagloomResult<()> {
	let mut view = View::default();
	view.config_mut().language = Some("fr".to_string());
	if with_translator {
		view.set_translator(french);
	}
	view.load_string(
		r#"<p xmlns:tl="urn:tagloom" tl:trans="messages"><tl:trans key="hello">Hello</tl:trans> <tl:trans>world</tl:trans></p>"#,
	);

	assert_eq!(view.render()?, expected);

	Ok(())
}

#[test]
fn rendering_without_a_template_fails() {
	let mut view = View::default();

	assert!(matches!(view.render(), Err(TagloomError::NoTemplate)));
}

fn cached_view(dir: &Path, page: &Path) -> TagloomResult<View> {
	let mut view = View::new(EngineConfig {
		cache_root: Some(dir.join("cache")),
		..EngineConfig::default()
	});
	view.load_file(page)?;
	Ok(view)
}

fn touch_future(path: &Path) -> std::io::Result<()> {
	std::fs::File::options()
		.write(true)
		.open(path)?
		.set_modified(SystemTime::now() + Duration::from_secs(60))
}

#[test]
fn fresh_cache_is_reused() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(dir.path(), "page.xml", r#"<p tl:cond="1">cached</p>"#);

	let mut first = cached_view(dir.path(), &page)?;
	assert_eq!(first.render()?, "<p>cached</p>");
	assert!(!first.is_from_cache());
	assert!(dir.path().join("cache/trees/page.xml.tlc").is_file());

	let mut second = cached_view(dir.path(), &page)?;
	assert_eq!(second.render()?, "<p>cached</p>");
	assert!(second.is_from_cache());
	assert_eq!(second.template(), first.template());

	Ok(())
}

#[test]
fn stale_cache_is_rebuilt() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(dir.path(), "page.xml", "<p>old</p>");
	cached_view(dir.path(), &page)?.render()?;

	std::fs::write(&page, "<p>new</p>")?;
	touch_future(&page)?;

	let mut view = cached_view(dir.path(), &page)?;
	assert_eq!(view.render()?, "<p>new</p>");
	assert!(!view.is_from_cache());

	Ok(())
}

#[test]
fn cache_outlives_its_source() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(dir.path(), "page.xml", "<p>kept</p>");
	cached_view(dir.path(), &page)?.render()?;
	std::fs::remove_file(&page)?;

	let mut view = cached_view(dir.path(), &page)?;
	assert_eq!(view.render()?, "<p>kept</p>");
	assert!(view.is_from_cache());

	Ok(())
}

#[test]
fn missing_source_without_cache_is_not_found() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let mut view = View::default();
	view.load_file(dir.path().join("missing.xml"))?;

	assert!(matches!(
		view.render(),
		Err(TagloomError::FileNotFound { .. })
	));

	Ok(())
}

#[test]
#[traced_test]
fn corrupt_cache_is_rebuilt() {
	let dir = tempfile::tempdir().unwrap();
	let page = write_file(dir.path(), "page.xml", "<p>fresh</p>");
	let cache = CompileCache::new(dir.path().join("cache"), dir.path());
	let cache_file = cache.cache_path(&page);
	std::fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
	std::fs::write(&cache_file, "{ not a tree").unwrap();
	touch_future(&cache_file).unwrap();

	let mut view = cached_view(dir.path(), &page).unwrap();
	assert_eq!(view.render().unwrap(), "<p>fresh</p>");
	assert!(!view.is_from_cache());
	assert!(logs_contain("corrupt compiled tree cache"));
}

#[test]
#[traced_test]
fn failed_cache_write_is_logged() {
	let dir = tempfile::tempdir().unwrap();
	let page = write_file(dir.path(), "page.xml", "<p>fresh</p>");
	let cache = CompileCache::new(dir.path().join("cache"), dir.path());
	let cache_file = cache.cache_path(&page);
	write_file(&cache_file, "blocker", "");

	let mut view = cached_view(dir.path(), &page).unwrap();
	assert_eq!(view.render().unwrap(), "<p>fresh</p>");
	assert!(logs_contain("unable to move compiled tree cache into place"));

	let leftovers = std::fs::read_dir(cache_file.parent().unwrap())
		.unwrap()
		.filter_map(Result::ok)
		.filter(|entry| entry.path() != cache_file)
		.count();
	assert_eq!(leftovers, 0);
}

#[test]
fn cache_settings_must_match() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let page = write_file(dir.path(), "page.xml", "<p>x</p>");
	cached_view(dir.path(), &page)?.render()?;

	let mut view = cached_view(dir.path(), &page)?;
	view.config_mut().fold = false;
	view.render()?;
	assert!(!view.is_from_cache());

	Ok(())
}

#[rstest]
#[case::inside_root("/templates/pages/home.xml", "/cache/trees/pages/home.xml.tlc")]
#[case::outside_root("/elsewhere/x.xml", "/cache/trees/elsewhere/x.xml.tlc")]
fn cache_paths_mirror_sources(#[case] source: &str, #[case] expected: &str) {
	let cache = CompileCache::new("/cache", "/templates");

	assert_eq!(cache.cache_path(Path::new(source)), PathBuf::from(expected));
}

#[test]
fn config_file_sets_engine_and_data() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	write_file(
		dir.path(),
		"tagloom.toml",
		"language = \"fr\"\nfold = false\ncache_root = \".cache\"\n\n[data]\nsite = \"site.json\"\nmenu = { path = \"menu.txt\", format = \"text\" }\n",
	);
	write_file(dir.path(), "site.json", r#"{"name": "Loom"}"#);
	write_file(dir.path(), "menu.txt", "home");

	let mut view = View::from_config_root(dir.path())?;
	assert_eq!(view.config().language.as_deref(), Some("fr"));
	assert!(!view.config().fold);
	assert_eq!(view.config().cache_root, Some(dir.path().join(".cache")));
	assert_eq!(view.merged_data().get("menu"), Some(&Value::from("home")));

	view.load_string(r#"<p><tl:val value="/site/name"/></p>"#);
	assert_eq!(view.render()?, "<p>Loom</p>");

	Ok(())
}

#[test]
fn config_file_rejects_unknown_data_formats() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	write_file(dir.path(), "tagloom.toml", "[data]\nx = \"x.yaml\"\n");
	write_file(dir.path(), "x.yaml", "a: 1");

	assert!(matches!(
		View::from_config_root(dir.path()),
		Err(TagloomError::UnsupportedDataFormat(format)) if format == "yaml"
	));

	Ok(())
}

#[test]
fn missing_config_file_uses_defaults() -> TagloomResult<()> {
	let dir = tempfile::tempdir()?;
	let view = View::from_config_root(dir.path())?;

	assert_eq!(view.config(), &EngineConfig::default());

	Ok(())
}
