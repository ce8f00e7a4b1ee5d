// src/bin/greet.rs

use argbind::{
    Command, CommandSchema, Error, Parameter, Parsed, SourceResolver,
    core::sources,
    prompt::{DialoguerPrompter, with_prompt},
    schema,
};
use colored::*;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Hello {
    name: String,
    greeting: String,
    times: u32,
}

#[derive(Debug, Deserialize)]
struct Bye {
    names: Vec<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        // Help, version and usage errors are rendered by clap itself.
        if let Error::Parse(clap_err) = &e {
            clap_err.exit();
        }
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), Error> {
    let hello = Command::new(
        CommandSchema::new("hello")
            .description("Greet someone, asking for their name if needed.")
            .from_config(sources::toml_file("~/.config/greet/config.toml"))
            .use_environment(true)
            .environment_prefix("GREET_")
            .parameter(Parameter::argument("name").description("Who to greet"))
            .parameter(
                Parameter::option("greeting")
                    .alias("g")
                    .default_value("Hello")
                    .description("The greeting to use"),
            )
            .parameter(
                Parameter::option("times")
                    .alias("n")
                    .default_value(1)
                    .schema(schema::integer())
                    .description("How many times to greet"),
            ),
    )?
    .with_pipeline(
        with_prompt(SourceResolver, DialoguerPrompter).prompt("name", "Who should be greeted?"),
    )
    .action(say_hello);

    let bye = Command::new(
        CommandSchema::new("bye")
            .description("Say goodbye to everyone at once.")
            .parameter(
                Parameter::argument("names")
                    .variadic()
                    .schema(schema::list(schema::string())),
            ),
    )?
    .action(|parsed| {
        let bye: Bye = parsed.props.deserialize()?;
        println!("Goodbye, {}!", bye.names.join(", "));
        Ok(())
    });

    let greet = Command::new(
        CommandSchema::new("greet")
            .description("A small demo of layered parameter resolution.")
            .parameter(
                Parameter::option("color")
                    .negate()
                    .schema(schema::boolean())
                    .description("Disable colored output"),
            ),
    )?
    .subcommand(hello)?
    .subcommand(bye)?;

    greet.parse_async().await?;
    Ok(())
}

fn say_hello(parsed: &Parsed) -> anyhow::Result<()> {
    let hello: Hello = parsed.props.deserialize()?;
    let color = parsed.lookup("color").and_then(|v| v.as_bool()).unwrap_or(true);
    log::debug!("Greeting resolved from {:?}", parsed.context.source("greeting"));

    let line = format!("{}, {}!", hello.greeting, hello.name);
    for _ in 0..hello.times {
        if color {
            println!("{}", line.green().bold());
        } else {
            println!("{line}");
        }
    }
    Ok(())
}
