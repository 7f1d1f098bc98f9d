//! Option compiler: turns a definition into an instance template.

use crate::ordering::TestOrdering;
use envquery_core::{
    CompileError, ItemType, QueryDefinition, QueryGenerator, QueryOption, QueryTest, RunMode,
};
use tracing::{error, warn};

/// Compiled, immutable blueprint of a definition for one run mode.
///
/// Holds its own copies of generators and tests; query instances clone
/// them again so that working state never leaks between queries.
#[derive(Debug)]
pub struct InstanceTemplate {
    /// Definition name
    pub query_name: String,

    /// Run mode the tests were ordered for
    pub mode: RunMode,

    /// Surviving options, in definition order
    pub options: Vec<CompiledOption>,

    /// Options and tests dropped during compilation
    pub diagnostics: Vec<CompileError>,
}

/// One validated option with its tests in execution order.
#[derive(Debug)]
pub struct CompiledOption {
    /// Index of the option in the definition
    pub source_index: usize,

    /// Item source
    pub generator: Box<dyn QueryGenerator>,

    /// Type of the generated items
    pub item_type: ItemType,

    /// Tests in execution order
    pub tests: Vec<Box<dyn QueryTest>>,

    /// Policy used to order the tests
    pub ordering: TestOrdering,
}

impl CompiledOption {
    /// Test names in execution order.
    pub fn test_names(&self) -> Vec<&str> {
        self.tests.iter().map(|test| test.name()).collect()
    }
}

/// Compile `definition` for `mode`.
///
/// Broken options and unsupported tests are dropped and reported through
/// tracing and [`InstanceTemplate::diagnostics`]. Fails with
/// [`CompileError::EmptyTemplate`] when nothing survives.
pub fn compile_template(
    definition: &QueryDefinition,
    mode: RunMode,
) -> Result<InstanceTemplate, CompileError> {
    let query = definition.name.as_str();
    let mut options = Vec::with_capacity(definition.options.len());
    let mut diagnostics = Vec::new();

    for (index, option) in definition.options.iter().enumerate() {
        match compile_option(query, index, option, mode, &mut diagnostics) {
            Some(compiled) => options.push(compiled),
            None => continue,
        }
    }

    if options.is_empty() {
        warn!(target: "envquery", "Query [{}] doesn't have any valid options!", query);
        return Err(CompileError::EmptyTemplate {
            query: query.to_string(),
        });
    }

    Ok(InstanceTemplate {
        query_name: query.to_string(),
        mode,
        options,
        diagnostics,
    })
}

fn compile_option(
    query: &str,
    index: usize,
    option: &QueryOption,
    mode: RunMode,
    diagnostics: &mut Vec<CompileError>,
) -> Option<CompiledOption> {
    let item_type = option.generator.as_deref().and_then(|g| g.item_type());
    let (Some(generator), Some(item_type)) = (option.generator.as_deref(), item_type) else {
        let broken = CompileError::InvalidOption {
            query: query.to_string(),
            option: index,
            generator: if option.generator.is_some() { "ok" } else { "MISSING" },
            item_type: if option.generator.is_some() { "MISSING" } else { "N/A" },
        };
        error!(target: "envquery", "Trying to spawn a query with broken template: {}", broken);
        diagnostics.push(broken);
        return None;
    };

    let mut tests: Vec<Box<dyn QueryTest>> = Vec::with_capacity(option.tests.len());
    for test in &option.tests {
        if test.supports_item(&item_type) {
            tests.push(test.box_clone());
        } else {
            let unsupported = CompileError::UnsupportedTest {
                query: query.to_string(),
                option: index,
                generator: generator.name().to_string(),
                test: test.name().to_string(),
            };
            warn!(target: "envquery", "{}", unsupported);
            diagnostics.push(unsupported);
        }
    }

    if tests.is_empty() {
        let empty = CompileError::OptionWithoutTests {
            query: query.to_string(),
            option: index,
            generator: generator.name().to_string(),
        };
        warn!(target: "envquery", "{}", empty);
        diagnostics.push(empty);
        return None;
    }

    let ordering = if generator.auto_sort_tests() {
        TestOrdering::for_mode(mode, tests.iter().map(|test| test.cost()))
    } else {
        TestOrdering::Declaration
    };
    ordering.sort_tests(&mut tests);

    Some(CompiledOption {
        source_index: index,
        generator: generator.box_clone(),
        item_type,
        tests,
        ordering,
    })
}
