//! Server-rendered pages. Every dynamic value goes through `html_escape`.

use html_escape::{encode_double_quoted_attribute, encode_text};
use shared::{AnalysisResult, TrialSummary};
use uuid::Uuid;

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="/static/app.css">
</head>
<body>
<main class="container">
{body}
</main>
</body>
</html>
"#,
        title = encode_text(title),
        body = body
    )
}

pub fn index() -> String {
    page(
        "Skin Screening",
        r#"<h1>Skin Screening</h1>
<p>Upload a photo of the affected area. We check it for signs of Atopic Dermatitis and list recruiting clinical trials.</p>
<form action="/analyze" method="post" enctype="multipart/form-data">
  <input type="file" name="file" accept="image/*" required>
  <button type="submit">Analyze</button>
</form>
<p class="disclaimer">This is a screening prototype, not a diagnosis.</p>"#,
    )
}

pub fn processing(task_id: Uuid) -> String {
    let body = format!(
        r#"<h1>Analyzing your image</h1>
<div class="skeleton" id="progress">Running the classifier and searching the trial registry...</div>
<p class="error" id="error" hidden></p>
<script>
(function () {{
  const taskId = "{task_id}";
  async function poll() {{
    const resp = await fetch("/status/" + taskId);
    if (resp.status === 404) {{ window.location = "/"; return; }}
    const task = await resp.json();
    if (task.status === "completed") {{ window.location = "/result/" + taskId; return; }}
    if (task.status === "error") {{
      const el = document.getElementById("error");
      el.textContent = task.error || "error";
      el.hidden = false;
      document.getElementById("progress").hidden = true;
      return;
    }}
    setTimeout(poll, 2000);
  }}
  poll();
}})();
</script>"#,
        task_id = task_id
    );
    page("Analyzing...", &body)
}

fn trial_card(trial: &TrialSummary) -> String {
    let phases = if trial.phases.is_empty() {
        "N/A".to_string()
    } else {
        trial.phases.join(", ")
    };
    let locations = if trial.locations.is_empty() {
        "Not listed".to_string()
    } else {
        trial.locations.join("; ")
    };
    format!(
        r#"<article class="trial">
  <h3><a href="https://clinicaltrials.gov/study/{id_attr}">{id}</a>: {title}</h3>
  <p><strong>Status:</strong> {status} &middot; <strong>Phase:</strong> {phases}</p>
  <p><strong>Locations:</strong> {locations}</p>
  <p class="match">{reason}</p>
</article>"#,
        id_attr = encode_double_quoted_attribute(&trial.id),
        id = encode_text(&trial.id),
        title = encode_text(&trial.title),
        status = encode_text(&trial.status),
        phases = encode_text(&phases),
        locations = encode_text(&locations),
        reason = encode_text(&trial.match_reason),
    )
}

pub fn results(result: &AnalysisResult) -> String {
    let trials = if result.trials.is_empty() {
        "<p>No matching trials.</p>".to_string()
    } else {
        result.trials.iter().map(trial_card).collect::<Vec<_>>().join("\n")
    };
    let body = format!(
        r#"<h1>Result</h1>
<section class="verdict confidence-{confidence}">
  <h2>{condition}</h2>
  <p><strong>Confidence:</strong> {confidence}</p>
  <p>{explanation}</p>
</section>
<h2>Clinical trials</h2>
{trials}
<p><a href="/">Analyze another image</a></p>"#,
        confidence = result.confidence,
        condition = encode_text(&result.condition),
        explanation = encode_text(&result.explanation),
        trials = trials,
    );
    page("Result", &body)
}
