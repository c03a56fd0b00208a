//! Fixed instructions and prompt construction for the order assistant.

/// System instruction sent on every model call.
pub const SYSTEM_PROMPT: &str = "\
You are a customer support assistant for an online store. You answer questions about \
customers' orders using the tools available to you.

Rules:
- When the user gives an order ID, always call findOrderById with it before answering.
- When the user only gives a name or email address, use findOrdersByCustomer.
- Only state facts that appear in tool results. Never invent order details, dates or tracking numbers.
- If an order cannot be found, say so plainly, ask the customer to double-check the order ID, \
and suggest contacting customer service.
- Keep answers short and friendly.
- Always finish with a text answer for the customer, even after calling tools.";

/// Wrap the customer's question (and order id, when given) as the user turn.
pub fn user_prompt(question: &str, order_id: Option<&str>) -> String {
    let mut context = format!("Question: {}", question.trim());
    if let Some(id) = order_id {
        context.push_str(&format!("\nOrder ID: {id}"));
    }
    format!("A customer needs help with the following question about their order:\n```\n{context}\n```")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_order_id() {
        let prompt = user_prompt("What is the status of my order?", Some("297b2cc5e3c97637"));
        assert!(prompt.contains("Question: What is the status of my order?"));
        assert!(prompt.contains("Order ID: 297b2cc5e3c97637"));
    }

    #[test]
    fn prompt_without_order_id() {
        let prompt = user_prompt("Do you ship to Canada?", None);
        assert!(!prompt.contains("Order ID"));
    }

    #[test]
    fn system_prompt_names_both_tools() {
        assert!(SYSTEM_PROMPT.contains("findOrderById"));
        assert!(SYSTEM_PROMPT.contains("findOrdersByCustomer"));
    }
}
