//! Sample templates and client modules for testing and demonstration.
//!
//! Each template exercises a different part of the pipeline: utility
//! classes, client components, and total-page references.

use crate::client::MemoryModuleResolver;

/// Invoice with headings, a table and utility classes only.
pub fn invoice_template() -> &'static str {
    r##"
<div class="p-6">
    <h1 class="text-3xl font-bold mb-4 text-blue-700">Invoice #2024-001</h1>

    <div class="flex justify-between mb-6">
        <div>
            <p class="font-bold">From:</p>
            <p>Acme Corp</p>
            <p>123 Business St</p>
            <p>New York, NY 10001</p>
        </div>
        <div>
            <p class="font-bold">To:</p>
            <p>Client Inc</p>
            <p>456 Client Ave</p>
            <p>Los Angeles, CA 90001</p>
        </div>
    </div>

    <table class="w-full mb-6 border-collapse">
        <tr>
            <th class="text-left p-2 bg-gray-200">Item</th>
            <th class="text-left p-2 bg-gray-200">Qty</th>
            <th class="text-left p-2 bg-gray-200">Price</th>
            <th class="text-left p-2 bg-gray-200">Total</th>
        </tr>
        <tr>
            <td class="p-2 border-b border-gray-300">Web Development</td>
            <td class="p-2 border-b border-gray-300">40</td>
            <td class="p-2 border-b border-gray-300">$150.00</td>
            <td class="p-2 border-b border-gray-300">$6,000.00</td>
        </tr>
        <tr>
            <td class="p-2 border-b border-gray-300">Design Services</td>
            <td class="p-2 border-b border-gray-300">20</td>
            <td class="p-2 border-b border-gray-300">$125.00</td>
            <td class="p-2 border-b border-gray-300">$2,500.00</td>
        </tr>
        <tr>
            <td class="p-2">Hosting (Annual)</td>
            <td class="p-2">1</td>
            <td class="p-2">$500.00</td>
            <td class="p-2">$500.00</td>
        </tr>
    </table>

    <div class="text-right">
        <p class="text-xl font-bold">Total: $9,000.00</p>
    </div>
</div>
"##
}

/// Quarterly report with two instances of the bar chart client component.
pub fn chart_report_template() -> &'static str {
    r##"
<div class="p-6">
    <h1 class="text-2xl font-bold mb-2">Quarterly Report</h1>
    <p class="text-sm text-gray-500 mb-6">Revenue and costs by quarter</p>

    <section class="mb-6 break-inside-avoid">
        <h2 class="text-lg font-semibold mb-2">Revenue</h2>
        <client-component src="charts/bar.js" key="revenue"
            props='{"label": "Revenue", "values": [120, 180, 150, 210]}'></client-component>
    </section>

    <section class="mb-6 break-inside-avoid">
        <h2 class="text-lg font-semibold mb-2">Costs</h2>
        <client-component src="charts/bar.js" key="costs"
            props='{"label": "Costs", "values": [90, 95, 110, 100], "barClass": "bg-red-500"}'></client-component>
    </section>

    <p class="text-xs text-gray-500">Page <page-number></page-number> of <total-pages></total-pages></p>
</div>
"##
}

/// A long report: `sections` sections of paragraphs, each closed by a
/// "Page x of N" line, with a forced break between sections.
pub fn long_report_template(sections: usize) -> String {
    let mut html = String::from(
        "<h1 class=\"text-3xl font-bold mb-4\">Annual Review</h1>\n\
         <p class=\"italic mb-6\">This document is <total-pages></total-pages> pages long.</p>\n",
    );
    for s in 1..=sections {
        let class = if s < sections {
            "mb-4 break-after"
        } else {
            "mb-4"
        };
        html.push_str(&format!("<section class=\"{class}\">\n"));
        html.push_str(&format!(
            "<h2 class=\"text-xl font-semibold mb-2\">Section {s}</h2>\n"
        ));
        for p in 1..=12 {
            html.push_str(&format!(
                "<p class=\"mb-2 leading-relaxed\">Paragraph {p} of section {s}. Lorem ipsum \
                 dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt \
                 ut labore et dolore magna aliqua.</p>\n"
            ));
        }
        html.push_str(
            "<p class=\"text-xs text-gray-500 text-right\">Page <page-number></page-number> \
             of <total-pages></total-pages></p>\n</section>\n",
        );
    }
    html
}

/// Smallest possible document.
pub fn minimal_template() -> &'static str {
    "<p>Hello, World!</p>"
}

/// Bar chart component used by [`chart_report_template`].
pub const BAR_CHART_MODULE: &str = r#"const scale = require("./scale.js");

module.exports = function mount(el, props) {
  const max = Math.max.apply(null, props.values);
  const wrap = document.createElement("div");
  wrap.className = "flex items-end gap-2 h-32";
  props.values.forEach(function (v) {
    const bar = document.createElement("div");
    bar.className = (props.barClass || "bg-blue-500") + " w-8";
    bar.style.height = scale(v, max, 128) + "px";
    wrap.appendChild(bar);
  });
  const caption = document.createElement("p");
  caption.className = "text-xs text-gray-500 mt-1";
  caption.textContent = props.label;
  el.appendChild(wrap);
  el.appendChild(caption);
};
"#;

/// Shared dependency of the chart components.
pub const SCALE_MODULE: &str = r#"module.exports = function scale(value, max, size) {
  return max > 0 ? Math.round((value / max) * size) : 0;
};
"#;

/// Resolver holding the sample client modules.
pub fn sample_modules() -> MemoryModuleResolver {
    MemoryModuleResolver::new()
        .with_module("charts/bar.js", BAR_CHART_MODULE)
        .with_module("charts/scale.js", SCALE_MODULE)
}

/// Template by name, for the command line.
pub fn sample(name: &str) -> Option<String> {
    match name {
        "invoice" => Some(invoice_template().to_string()),
        "chart-report" | "charts" => Some(chart_report_template().to_string()),
        "long-report" | "long" => Some(long_report_template(4)),
        "minimal" => Some(minimal_template().to_string()),
        _ => None,
    }
}
