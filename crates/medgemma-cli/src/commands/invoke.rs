//! Endpoint invocation commands

use anyhow::{bail, Result};
use medgemma_aws::EndpointClient;
use medgemma_core::{
    encode_image_file, resolve_endpoint_name, ChatMessage, ContentPart, InvocationRequest,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{banner, rule, Project};

/// Directory searched for images given by bare file name
pub const TEST_IMAGES_DIR: &str = "test_images";

const DEFAULT_IMAGE_QUESTION: &str = "Describe what you see in this medical image.";
const IMAGE_SYSTEM_PROMPT: &str = "You are an expert medical doctor analyzing medical images.";
const ASK_SYSTEM_PROMPT: &str = "You are a knowledgeable medical assistant.";

/// One canned test request
struct TestCase {
    title: &'static str,
    system: Option<&'static str>,
    question: &'static str,
    image: Option<&'static str>,
    max_new_tokens: u32,
}

const TEST_CASES: &[TestCase] = &[
    TestCase {
        title: "General Medical Query (Text-Only)",
        system: Some("You are a doctor."),
        question: "Explain what are the symptoms that warrant a health screening.",
        image: None,
        max_new_tokens: 128,
    },
    TestCase {
        title: "Clinical Scenario (Text-Only)",
        system: Some("You are a senior internal medicine consultant."),
        question: "A 55-year-old man presents with chest pain after exertion, relieved by rest. What is the likely diagnosis and next step?",
        image: None,
        max_new_tokens: 500,
    },
    TestCase {
        title: "Medical Image Analysis (Image + Text)",
        system: None,
        question: "Describe what you see in this medical image. What abnormalities, if any, are present?",
        image: Some("medical_image.png"),
        max_new_tokens: 300,
    },
    TestCase {
        title: "Chest X-ray Interpretation (Image + Text)",
        system: Some("You are a radiologist specializing in chest imaging."),
        question: "Please interpret this chest X-ray. Describe the findings and provide a differential diagnosis.",
        image: Some("chest_xray.png"),
        max_new_tokens: 500,
    },
];

/// Build a chat request: optional system message, then the image (if any) and the question
pub fn chat_request(
    system: Option<&str>,
    question: &str,
    image_base64: Option<String>,
    max_new_tokens: u32,
) -> InvocationRequest {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }

    let mut parts = Vec::new();
    if let Some(image) = image_base64 {
        parts.push(ContentPart::image(image));
    }
    parts.push(ContentPart::text(question));
    messages.push(ChatMessage::user(parts));

    InvocationRequest::new(messages, max_new_tokens)
}

/// Find an image given a path or a file name inside `images_dir`
pub fn resolve_image_path(input: &str, images_dir: &Path) -> Option<PathBuf> {
    let direct = PathBuf::from(input);
    if direct.is_file() {
        return Some(direct);
    }
    let in_dir = images_dir.join(input);
    in_dir.is_file().then_some(in_dir)
}

/// Image files available in `images_dir`, sorted
pub fn available_images(images_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(images_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| {
            let lower = name.to_lowercase();
            [".png", ".jpg", ".jpeg"].iter().any(|ext| lower.ends_with(ext))
        })
        .collect();
    names.sort();
    names
}

async fn endpoint_client(project: &Project) -> Result<EndpointClient> {
    let settings = &project.settings;
    let endpoint_name = resolve_endpoint_name(
        &project.layout.endpoint_info_path(),
        settings.endpoint_name.as_deref(),
    )?;
    let ctx = project.aws().await;
    Ok(EndpointClient::new(
        &ctx,
        endpoint_name,
        Duration::from_secs(settings.request_timeout_secs),
    ))
}

/// Send one request and print the answer
async fn run(client: &EndpointClient, request: &InvocationRequest, stream: bool) -> Result<String> {
    if stream {
        let mut stdout = io::stdout();
        let text = client
            .invoke_stream(request, |chunk| {
                print!("{}", chunk);
                let _ = stdout.flush();
            })
            .await?;
        println!();
        Ok(text)
    } else {
        let response = client.invoke(request).await?;
        println!("{}", response.generated_text);
        Ok(response.generated_text)
    }
}

fn print_login_hint(project: &Project) {
    eprintln!(
        "\nMake sure you've run: aws sso login --profile {}",
        project.settings.aws_profile
    );
}

pub async fn test_endpoint(project: &Project, stream: bool) -> Result<()> {
    let client = endpoint_client(project).await?;
    println!("Testing endpoint: {}", client.endpoint_name());
    println!("AWS Profile: {}", project.settings.aws_profile);
    println!("Region: {}", project.settings.aws_region);

    let images_dir = Path::new(TEST_IMAGES_DIR);
    for (index, case) in TEST_CASES.iter().enumerate() {
        println!();
        banner(&format!("Test {}: {}", index + 1, case.title));

        let image = match case.image {
            Some(name) => {
                let path = images_dir.join(name);
                if !path.is_file() {
                    println!("Test image not found at '{}', skipping.", path.display());
                    println!("Place an image (X-ray, CT scan or dermatology photo) there to run this test.");
                    continue;
                }
                println!("Loading image: {}", path.display());
                Some(encode_image_file(&path)?)
            }
            None => None,
        };

        let request = chat_request(case.system, case.question, image, case.max_new_tokens);
        println!("\nResponse:");
        if let Err(e) = run(&client, &request, stream).await {
            eprintln!("\nError: {}", e);
            print_login_hint(project);
            return Err(e);
        }
    }

    println!();
    banner("Testing complete!");
    println!("Test with a specific image: medgemma test-image chest_xray.png 'Your question'");
    Ok(())
}

pub async fn test_image(
    project: &Project,
    image: &str,
    question: Option<String>,
    stream: bool,
) -> Result<()> {
    let images_dir = Path::new(TEST_IMAGES_DIR);
    let Some(path) = resolve_image_path(image, images_dir) else {
        eprintln!("Image not found at '{}'", image);
        let available = available_images(images_dir);
        if !available.is_empty() {
            eprintln!("\nAvailable images in {}/:", TEST_IMAGES_DIR);
            for name in available {
                eprintln!("  - {}", name);
            }
        }
        bail!("image not found: {}", image);
    };
    let question = question.unwrap_or_else(|| DEFAULT_IMAGE_QUESTION.to_string());

    let client = endpoint_client(project).await?;
    println!("Testing endpoint: {}", client.endpoint_name());
    println!("Image: {}", path.display());
    println!("Question: {}", question);
    println!("{}", rule());

    let request = chat_request(
        Some(IMAGE_SYSTEM_PROMPT),
        &question,
        Some(encode_image_file(&path)?),
        project.settings.max_new_tokens,
    );

    println!("\nGenerating response...\n");
    match run(&client, &request, stream).await {
        Ok(_) => {
            println!("{}", rule());
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_login_hint(project);
            Err(e)
        }
    }
}

pub async fn ask(project: &Project, prompt: &str, stream: bool) -> Result<()> {
    let client = endpoint_client(project).await?;
    println!("Invoking endpoint: {}", client.endpoint_name());
    println!("Prompt: {}\n", prompt);

    let request = chat_request(
        Some(ASK_SYSTEM_PROMPT),
        prompt,
        None,
        project.settings.max_new_tokens,
    );
    run(&client, &request, stream).await?;
    Ok(())
}
